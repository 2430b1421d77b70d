//! Display implementations and the text dump used for debugging and for
//! comparing compilation results.
//!
//! The output is deterministic: equal IR always prints identically.

use std::fmt;

use crate::compute::{ReduceCompute, TensorCompute};
use crate::expr::{ConstValue, Constant, Expr, UnaryOp, Var};
use crate::func::{Function, IRModule};
use crate::graph::{FlowGraph, TensorSource};
use crate::stmt::Stmt;
use crate::task::{Task, Worker};
use crate::types::{DataType, HoleId, MemoryScope, RegisterLayout, RegisterScope, Slot, TensorType, Type};

/// Constants with more elements than this print only their shape.
const MAX_PRINTED_ELEMENTS: usize = 16;

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for HoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

impl<T: fmt::Display> fmt::Display for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Hole(h) => write!(f, "{h}"),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for RegisterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = join(&self.local_shape);
        match &self.layout {
            RegisterLayout::Identity => write!(f, "register([{local}], identity)"),
            RegisterLayout::Cyclic { lanes } => write!(f, "register([{local}], cyclic[{}])", join(lanes)),
            RegisterLayout::Blocked { lanes } => write!(f, "register([{local}], blocked[{}])", join(lanes)),
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Shared => write!(f, "shared"),
            Self::Local => write!(f, "local"),
            Self::Register(Slot::Known(rs)) => write!(f, "{rs}"),
            Self::Register(Slot::Hole(h)) => write!(f, "register({h})"),
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match &self.shape {
            Some(s) => format!("[{}]", join(s)),
            None => "[..]".to_string(),
        };
        write!(f, "TensorType({}, {shape}, {}", self.dtype, self.scope)?;
        if let Some(strides) = &self.strides {
            write!(f, ", strides=[{}]", join(strides))?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Tensor(t) => write!(f, "{t}"),
            Self::Pointer(b) => write!(f, "PointerType({b})"),
            Self::Reference(b) => write!(f, "ReferenceType({b})"),
            Self::TensorPointer(t) => write!(f, "TensorPointerType({t})"),
            Self::Void => write!(f, "VoidType"),
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dim(d: Option<u32>) -> String {
            d.map_or_else(|| "None".to_string(), |d| d.to_string())
        }
        match self {
            Self::Host => write!(f, "Host"),
            Self::Grid {
                grid_dim,
                block_dim,
            } => write!(f, "Grid({}, {})", dim(*grid_dim), dim(*block_dim)),
            Self::ThreadBlock { block_dim } => write!(f, "ThreadBlock({})", dim(*block_dim)),
            Self::Warp => write!(f, "Warp"),
            Self::Thread => write!(f, "Thread"),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for TensorCompute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TensorCompute({}, [{}], [{}], {})",
            self.name,
            join(&self.shape),
            join(&self.axes),
            self.value
        )
    }
}

impl fmt::Display for ReduceCompute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReduceCompute({}, [{}], [{}], {})",
            self.kind.name(),
            join(&self.shape),
            join(&self.axes),
            self.value
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(v) => write!(f, "{v}"),
            Self::Constant(c) => write!(f, "{c}"),
            Self::Unary { op, expr } => match op {
                UnaryOp::Neg => write!(f, "(-{expr})"),
                UnaryOp::Not => write!(f, "!{expr}"),
                UnaryOp::BitNot => write!(f, "~{expr}"),
            },
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Let { var, value, body } => write!(f, "let({var}={value}: {body})"),
            Self::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => write!(f, "({cond} ? {then_expr} : {else_expr})"),
            Self::TensorElement { base, indices } => write!(f, "{base}[{}]", join(indices)),
            Self::Call { func, args } => write!(f, "{func}({})", join(args)),
            Self::Cast { expr, target } => write!(f, "cast({target}, {expr})"),
            Self::Dereference(e) => write!(f, "*{e}"),
            Self::Address(e) => write!(f, "&{e}"),
            Self::Reference(e) => write!(f, "Ref({e})"),
            Self::ScalarInput(s) => f.write_str(&s.name),
            Self::TensorInput(t) => f.write_str(&t.name),
            Self::TensorCompute(c) => write!(f, "{c}"),
            Self::ReduceCompute(r) => write!(f, "{r}"),
            Self::Any(a) => write!(f, "AnyExpr({})", a.hole),
            Self::ComputePattern(p) => {
                let rank = p.rank.map_or_else(|| "None".to_string(), |r| r.to_string());
                write!(f, "TensorComputePattern(rank={rank}, allow_reduce={})", p.allow_reduce)
            }
            Self::ReducePattern(p) => {
                let kind = p.kind.map_or("None", |k| k.name());
                write!(f, "ReduceComputePattern(kind={kind})")
            }
        }
    }
}

fn write_stmt(out: &mut String, stmt: &Stmt, indent: usize) {
    let pad = " ".repeat(indent);
    match stmt {
        Stmt::Evaluate(e) => out.push_str(&format!("{pad}{e}\n")),
        Stmt::Assign { var, value } => out.push_str(&format!("{pad}{var} = {value}\n")),
        Stmt::BufferStore {
            buf,
            indices,
            value,
        } => out.push_str(&format!("{pad}{buf}[{}] = {value}\n", join(indices))),
        Stmt::Let { var, value, body } => {
            out.push_str(&format!("{pad}let {var}: {} = {value}\n", var.ty));
            write_stmt(out, body, indent);
        }
        Stmt::For {
            var,
            extent,
            unroll,
            body,
        } => {
            let hint = match unroll {
                Some(true) => "[unroll]",
                Some(false) => "[no-unroll]",
                None => "",
            };
            out.push_str(&format!("{pad}for {var} in range({extent}){hint}\n"));
            write_stmt(out, body, indent + 4);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            out.push_str(&format!("{pad}if {cond}\n"));
            write_stmt(out, then_body, indent + 4);
            if let Some(else_body) = else_body {
                out.push_str(&format!("{pad}else\n"));
                write_stmt(out, else_body, indent + 4);
            }
        }
        Stmt::Assert { cond, msg } => out.push_str(&format!("{pad}assert({cond}, {msg:?})\n")),
        Stmt::Asm {
            template,
            outputs,
            inputs,
            volatile,
        } => {
            let labelled = |items: &[(String, Expr)]| {
                items
                    .iter()
                    .map(|(label, e)| format!("{label}({e})"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let volatile = if *volatile { "volatile " } else { "" };
            out.push_str(&format!(
                "{pad}asm {volatile}({template} : {} : {});\n",
                labelled(outputs),
                labelled(inputs)
            ));
        }
        Stmt::BlackBox { template, exprs } => {
            let mut text = String::new();
            let mut args = exprs.iter();
            let mut pieces = template.split("{}").peekable();
            while let Some(piece) = pieces.next() {
                text.push_str(piece);
                if pieces.peek().is_some() {
                    match args.next() {
                        Some(e) => text.push_str(&e.to_string()),
                        None => text.push_str("{}"),
                    }
                }
            }
            for line in text.lines() {
                out.push_str(&format!("{pad}{line}\n"));
            }
        }
        Stmt::Return(None) => out.push_str(&format!("{pad}return\n")),
        Stmt::Return(Some(e)) => out.push_str(&format!("{pad}return {e}\n")),
        Stmt::Seq(stmts) => {
            for s in stmts {
                write_stmt(out, s, indent);
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_stmt(&mut out, self, 0);
        f.write_str(&out)
    }
}

fn write_function(out: &mut String, func: &Function) {
    let params: Vec<String> = func.params.iter().map(|p| format!("{p}: {}", p.ty)).collect();
    out.push_str(&format!(
        "def {}({}) -> {} [{}]",
        func.name,
        params.join(", "),
        func.ret_type,
        func.attrs.worker
    ));
    if let Some(packed) = &func.attrs.packed_func {
        out.push_str(&format!(" packed={packed}"));
    }
    if let Some(label) = &func.attrs.label {
        out.push_str(&format!(" label={label}"));
    }
    out.push('\n');
    for local in &func.local_vars {
        out.push_str(&format!("    declare {local}: {}\n", local.ty));
    }
    write_stmt(out, &func.body, 4);
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_function(&mut out, self);
        f.write_str(&out)
    }
}

/// Text form of a module: every function in order, separated by blank lines.
pub fn dump_module(module: &IRModule) -> String {
    let mut out = String::new();
    for (i, func) in module.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write_function(&mut out, func);
    }
    out
}

/// Text form of a task: name, worker, typed parameters and definition.
pub fn dump_task(task: &Task) -> String {
    let mut out = format!("task {} on {}\n", task.name, task.worker);
    for (param, ty) in task.params.iter().zip(&task.param_types) {
        let name = param.compute_name().unwrap_or("_");
        out.push_str(&format!("  param {name}: {ty}\n"));
    }
    out.push_str(&format!("  compute {}\n", task.computation));
    out
}

/// Text form of a graph: inputs, constants, operators in topological order
/// and outputs.
pub fn dump_graph(graph: &FlowGraph) -> String {
    let mut out = String::from("graph {\n");
    for (id, info) in graph.tensors() {
        let ty = format!("{}[{}]", info.dtype, join(&info.shape));
        match &info.source {
            TensorSource::Input { name } => out.push_str(&format!("  input {id} {name:?}: {ty}\n")),
            TensorSource::Constant(value) if value.len() <= MAX_PRINTED_ELEMENTS => {
                let values: Vec<String> = value.iter().map(|v| format!("{v:?}")).collect();
                out.push_str(&format!("  const {id}: {ty} = [{}]\n", values.join(", ")));
            }
            TensorSource::Constant(_) => out.push_str(&format!("  const {id}: {ty}\n")),
            TensorSource::Operator => {}
        }
    }
    for op in graph.nodes() {
        let ty = graph
            .tensor(op.output)
            .map(|info| format!("{}[{}]", info.dtype, join(&info.shape)))
            .unwrap_or_default();
        out.push_str(&format!(
            "  {} = {}({}) : {ty} on {}\n",
            op.output,
            op.kind.label(),
            join(&op.inputs),
            op.task.worker
        ));
    }
    out.push_str(&format!("  return {}\n}}\n", join(graph.outputs())));
    out
}

impl fmt::Display for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&dump_graph(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::TensorInput;
    use crate::ops;
    use crate::primitives;

    #[test]
    fn display_types() {
        let t = TensorType::new(MemoryScope::Shared, DataType::Float32, &[2, 2]);
        assert_eq!(t.to_string(), "TensorType(float32, [2, 2], shared)");
        let r = MemoryScope::Register(Slot::Known(RegisterScope::identity(vec![2, 2])));
        assert_eq!(r.to_string(), "register([2, 2], identity)");
        assert_eq!(Type::pointer(Type::Void).to_string(), "PointerType(VoidType)");
        let hole: Slot<DataType> = Slot::Hole(HoleId(4));
        assert_eq!(hole.to_string(), "?4");
    }

    #[test]
    fn display_workers() {
        assert_eq!(Worker::grid(2, 128).to_string(), "Grid(2, 128)");
        assert_eq!(Worker::any_grid().to_string(), "Grid(None, None)");
        assert_eq!(Worker::ThreadBlock { block_dim: Some(64) }.to_string(), "ThreadBlock(64)");
    }

    #[test]
    fn display_exprs() {
        let i = Var::int("i");
        let e = Expr::var(&i) * Expr::int(4) + Expr::int(1);
        assert_eq!(e.to_string(), "((i * 4) + 1)");
        assert_eq!(primitives::lane_id().to_string(), "(threadIdx.x() % 32)");
        let a = TensorInput::new("a", DataType::Float32, &[4]);
        assert_eq!(a.at(vec![Expr::var(&i)]).to_string(), "a[i]");
        assert_eq!(Expr::float(1.0).to_string(), "1.0");
    }

    #[test]
    fn display_statements() {
        let i = Var::int("i");
        let s = Stmt::for_range(
            i.clone(),
            Expr::int(2),
            Stmt::BufferStore {
                buf: Expr::var(&Var::int("out")),
                indices: vec![Expr::var(&i)],
                value: Expr::int(0),
            },
        );
        assert_eq!(s.to_string(), "for i in range(2)\n    out[i] = 0\n");
    }

    #[test]
    fn black_box_fills_placeholders() {
        let s = Stmt::BlackBox {
            template: "__syncwarp({});".into(),
            exprs: vec![Expr::int(1)],
        };
        assert_eq!(s.to_string(), "__syncwarp(1);\n");
    }

    #[test]
    fn graph_dump_is_deterministic() {
        let build = || {
            let mut g = FlowGraph::new();
            let x = ops::input(&mut g, "x", DataType::Float32, &[4]);
            let y = ops::relu(&mut g, x).unwrap();
            g.mark_output(y);
            g
        };
        let text = dump_graph(&build());
        assert_eq!(text, dump_graph(&build()));
        assert!(text.contains("input t0 \"x\": float32[4]"));
        assert!(text.contains("t1 = relu(t0) : float32[4] on Grid(1, 256)"));
        assert!(text.ends_with("  return t1\n}\n"));
    }

    #[test]
    fn task_dump_lists_params() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[4]);
        ops::neg(&mut g, x).unwrap();
        let text = dump_task(&g.nodes()[0].task);
        assert!(text.starts_with("task neg_t1 on Grid(1, 256)\n"));
        assert!(text.contains("  param t0: TensorType(float32, [4], global)\n"));
    }
}

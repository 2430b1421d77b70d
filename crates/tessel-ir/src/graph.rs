//! Operator-level computation graph.
//!
//! Every operator owns the [`Task`] that computes its single output. Task
//! inputs are [`TensorInput`]s named after the graph tensors they read
//! (`t{id}`), so rewiring an edge is a rename inside the compute definition.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use ndarray::ArrayD;

use crate::compute::{ReduceKind, TensorCompute, TensorInput};
use crate::error::IrError;
use crate::expr::Expr;
use crate::task::{Task, Worker};
use crate::types::DataType;

/// Threads per block used when the graph sizes operator launches.
pub const DEFAULT_BLOCK_SIZE: u32 = 256;

/// A grid with one thread per output element.
pub fn launch_worker(numel: i64, block_size: u32) -> Worker {
    let block = i64::from(block_size.max(1));
    let blocks = (numel.max(1) + block - 1) / block;
    Worker::grid(u32::try_from(blocks).unwrap_or(u32::MAX), block_size.max(1))
}

/// Handle to a tensor in a [`FlowGraph`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TensorId(u32);

impl TensorId {
    pub fn index(self) -> u32 {
        self.0
    }

    /// Name of the tensor inside task definitions.
    pub fn name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Where a tensor's value comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorSource {
    /// Supplied by the caller at run time.
    Input { name: String },
    /// Known at compile time.
    Constant(ArrayD<f64>),
    /// Produced by an operator.
    Operator,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TensorInfo {
    pub dtype: DataType,
    pub shape: Vec<i64>,
    pub source: TensorSource,
}

impl TensorInfo {
    pub fn numel(&self) -> i64 {
        self.shape.iter().product()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.source, TensorSource::Constant(_))
    }

    pub fn constant(&self) -> Option<&ArrayD<f64>> {
        match &self.source {
            TensorSource::Constant(a) => Some(a),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum UnaryKind {
    Relu,
    Neg,
    Exp,
    Sigmoid,
    Tanh,
    Sqrt,
    Abs,
}

impl UnaryKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::Neg => "neg",
            Self::Exp => "exp",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Sqrt => "sqrt",
            Self::Abs => "abs",
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Max,
}

impl BinaryKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Max => "max",
        }
    }
}

/// Fusion class of an operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum OpClass {
    /// One input, applied per element.
    UnaryElementwise,
    /// Several inputs, applied per (broadcast) element.
    Elementwise,
    /// Heavier operators that elementwise work fuses into.
    Anchor,
}

impl OpClass {
    pub fn is_elementwise(self) -> bool {
        matches!(self, Self::UnaryElementwise | Self::Elementwise)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    Unary(UnaryKind),
    Binary(BinaryKind),
    MatMul,
    Conv2d { stride: [i64; 2], padding: [i64; 2] },
    Reduce { kind: ReduceKind, axis: usize },
    /// Several operators merged into one task.
    Fused { class: OpClass, ops: Vec<String> },
}

impl OpKind {
    pub fn class(&self) -> OpClass {
        match self {
            Self::Unary(_) => OpClass::UnaryElementwise,
            Self::Binary(_) => OpClass::Elementwise,
            Self::MatMul | Self::Conv2d { .. } | Self::Reduce { .. } => OpClass::Anchor,
            Self::Fused { class, .. } => *class,
        }
    }

    /// Names of the primitive operators this kind stands for.
    pub fn op_names(&self) -> Vec<String> {
        match self {
            Self::Unary(u) => vec![u.name().to_string()],
            Self::Binary(b) => vec![b.name().to_string()],
            Self::MatMul => vec!["matmul".to_string()],
            Self::Conv2d { .. } => vec!["conv2d".to_string()],
            Self::Reduce { kind, .. } => vec![format!("reduce_{}", kind.name())],
            Self::Fused { ops, .. } => ops.clone(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Fused { ops, .. } => format!("fused_{}", ops.join("_")),
            other => other.op_names().join("_"),
        }
    }

    /// The kind obtained by fusing `producer` into `consumer`.
    pub fn fuse(producer: &OpKind, consumer: &OpKind, class: OpClass) -> OpKind {
        let mut ops = producer.op_names();
        ops.extend(consumer.op_names());
        OpKind::Fused { class, ops }
    }
}

/// A graph node: one task producing one tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Operator {
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub output: TensorId,
    pub task: Task,
}

impl Operator {
    pub fn class(&self) -> OpClass {
        self.kind.class()
    }

    pub fn computation(&self) -> &TensorCompute {
        &self.task.computation
    }
}

/// A dataflow graph of operators over tensors.
///
/// `nodes` is kept in topological order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowGraph {
    tensors: BTreeMap<TensorId, TensorInfo>,
    nodes: Vec<Operator>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    next_id: u32,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&mut self) -> TensorId {
        let id = TensorId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Declares a run-time input.
    pub fn add_input(&mut self, name: impl Into<String>, dtype: DataType, shape: &[i64]) -> TensorId {
        let id = self.fresh_id();
        self.tensors.insert(
            id,
            TensorInfo {
                dtype,
                shape: shape.to_vec(),
                source: TensorSource::Input { name: name.into() },
            },
        );
        self.inputs.push(id);
        id
    }

    /// Declares a compile-time constant.
    pub fn add_constant(&mut self, value: ArrayD<f64>, dtype: DataType) -> TensorId {
        let id = self.fresh_id();
        self.tensors.insert(
            id,
            TensorInfo {
                dtype,
                shape: value.shape().iter().map(|&d| d as i64).collect(),
                source: TensorSource::Constant(value),
            },
        );
        id
    }

    /// Appends an operator reading `inputs`.
    ///
    /// `define` receives the inputs as task placeholders and the output's
    /// name, which it should use to prefix axis names so they stay unique
    /// across the graph.
    pub fn add_operator(
        &mut self,
        kind: OpKind,
        inputs: &[TensorId],
        define: impl FnOnce(&[TensorInput], &str) -> TensorCompute,
    ) -> Result<TensorId, IrError> {
        let args = inputs
            .iter()
            .map(|&t| self.tensor_input(t))
            .collect::<Result<Vec<_>, _>>()?;
        let output = self.fresh_id();
        let computation = define(&args, &output.name());
        let op = self.make_operator(kind, inputs.to_vec(), output, computation)?;
        self.nodes.push(op);
        Ok(output)
    }

    /// Builds the operator producing `output` from `computation` and records
    /// the output tensor. The caller places it with [`Self::replace_node`] or
    /// [`Self::insert_node`].
    pub fn make_operator(
        &mut self,
        kind: OpKind,
        inputs: Vec<TensorId>,
        output: TensorId,
        mut computation: TensorCompute,
    ) -> Result<Operator, IrError> {
        computation.name = output.name();
        let shape = computation.const_shape().ok_or_else(|| IrError::Unresolved {
            what: format!("shape of {output}"),
        })?;
        let args = inputs
            .iter()
            .map(|&t| self.tensor_input(t))
            .collect::<Result<Vec<_>, _>>()?;
        let numel = shape.iter().product();
        let task = Task::from_compute(
            format!("{}_{output}", kind.label()),
            args,
            computation,
            launch_worker(numel, DEFAULT_BLOCK_SIZE),
        )?;
        let dtype = task.output_dtype()?;
        self.tensors.insert(
            output,
            TensorInfo {
                dtype,
                shape,
                source: TensorSource::Operator,
            },
        );
        Ok(Operator {
            kind,
            inputs,
            output,
            task,
        })
    }

    pub fn mark_output(&mut self, tensor: TensorId) {
        if !self.outputs.contains(&tensor) {
            self.outputs.push(tensor);
        }
    }

    /// The task placeholder reading `tensor`.
    pub fn tensor_input(&self, tensor: TensorId) -> Result<TensorInput, IrError> {
        let info = self.tensor(tensor)?;
        Ok(TensorInput::new(tensor.name(), info.dtype, &info.shape))
    }

    pub fn tensor(&self, tensor: TensorId) -> Result<&TensorInfo, IrError> {
        self.tensors
            .get(&tensor)
            .ok_or(IrError::UnknownTensor(tensor.0))
    }

    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &TensorInfo)> {
        self.tensors.iter().map(|(&id, info)| (id, info))
    }

    pub fn nodes(&self) -> &[Operator] {
        &self.nodes
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn is_output(&self, tensor: TensorId) -> bool {
        self.outputs.contains(&tensor)
    }

    /// Tasks of every operator, in topological order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.nodes.iter().map(|op| &op.task)
    }

    /// Index of the node producing `tensor`.
    pub fn producer(&self, tensor: TensorId) -> Option<usize> {
        self.nodes.iter().position(|op| op.output == tensor)
    }

    /// Indices of the nodes reading `tensor`, in node order.
    pub fn consumers(&self, tensor: TensorId) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, op)| op.inputs.contains(&tensor))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn replace_node(&mut self, index: usize, op: Operator) {
        if let Some(slot) = self.nodes.get_mut(index) {
            *slot = op;
        }
    }

    pub fn insert_node(&mut self, index: usize, op: Operator) {
        let index = index.min(self.nodes.len());
        self.nodes.insert(index, op);
    }

    pub fn remove_node(&mut self, index: usize) -> Option<Operator> {
        (index < self.nodes.len()).then(|| self.nodes.remove(index))
    }

    /// Turns `tensor` into a compile-time constant, dropping its producer.
    pub fn set_constant(&mut self, tensor: TensorId, value: ArrayD<f64>) -> Result<(), IrError> {
        if let Some(index) = self.producer(tensor) {
            self.nodes.remove(index);
        }
        let info = self
            .tensors
            .get_mut(&tensor)
            .ok_or(IrError::UnknownTensor(tensor.0))?;
        info.source = TensorSource::Constant(value);
        Ok(())
    }

    /// Makes node `index` read `new` wherever it read `old`.
    ///
    /// Both tensors must have the same type.
    pub fn replace_input(&mut self, index: usize, old: TensorId, new: TensorId) -> Result<(), IrError> {
        let Some(op) = self.nodes.get(index).cloned() else {
            return Ok(());
        };
        let (old_info, new_info) = (self.tensor(old)?, self.tensor(new)?);
        if old_info.shape != new_info.shape || old_info.dtype != new_info.dtype {
            return Err(IrError::ShapeMismatch {
                op: format!("rewire {old} -> {new}"),
                lhs: old_info.shape.clone(),
                rhs: new_info.shape.clone(),
            });
        }
        let replacement = self.tensor_input(new)?;
        let old_name = old.name();
        let mut computation = op.task.computation.clone();
        computation.value = computation.value.rewrite_post(&mut |e| match e {
            Expr::TensorInput(t) if t.name == old_name => Expr::TensorInput(replacement.clone()),
            other => other,
        });
        let mut inputs: Vec<TensorId> = Vec::with_capacity(op.inputs.len());
        for t in op.inputs.iter().map(|&t| if t == old { new } else { t }) {
            if !inputs.contains(&t) {
                inputs.push(t);
            }
        }
        let rebuilt = self.make_operator(op.kind, inputs, op.output, computation)?;
        self.nodes[index] = rebuilt;
        Ok(())
    }

    /// Re-derives the node list from the graph outputs.
    ///
    /// Nodes not reachable from an output are dropped, the remaining ones are
    /// put in topological order, and tensors no longer referenced are
    /// forgotten. Fails on a cycle.
    pub fn update_nodes(&mut self) -> Result<(), IrError> {
        let producers: HashMap<TensorId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, op)| (op.output, i))
            .collect();
        let mut state = vec![Visit::New; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for &out in &self.outputs {
            self.visit(out, &producers, &mut state, &mut order)?;
        }
        let nodes: Vec<Operator> = order.into_iter().map(|i| self.nodes[i].clone()).collect();
        self.nodes = nodes;

        let mut live: Vec<TensorId> = self.inputs.clone();
        live.extend(self.outputs.iter().copied());
        for op in &self.nodes {
            live.extend(op.inputs.iter().copied());
            live.push(op.output);
        }
        self.tensors.retain(|id, _| live.contains(id));
        Ok(())
    }

    fn visit(
        &self,
        tensor: TensorId,
        producers: &HashMap<TensorId, usize>,
        state: &mut [Visit],
        order: &mut Vec<usize>,
    ) -> Result<(), IrError> {
        let Some(&index) = producers.get(&tensor) else {
            return Ok(());
        };
        match state[index] {
            Visit::Done => return Ok(()),
            Visit::Active => {
                return Err(IrError::CyclicGraph {
                    node: self.nodes[index].task.name.clone(),
                });
            }
            Visit::New => {}
        }
        state[index] = Visit::Active;
        for &input in &self.nodes[index].inputs {
            self.visit(input, producers, state, order)?;
        }
        state[index] = Visit::Done;
        order.push(index);
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    New,
    Active,
    Done,
}

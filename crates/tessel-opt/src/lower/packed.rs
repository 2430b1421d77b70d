use tessel_ir::{
    DataType, Expr, Function, FunctionBuilder, IRModule, IrError, Slot, Stmt, Type, Worker,
};

use super::{ModuleTransform, Stage};
use crate::error::PassError;

/// Runtime type code a packed caller passes for an argument of type `ty`.
pub fn type_code(ty: &Type) -> Option<i64> {
    match ty {
        Type::Scalar(Slot::Known(dtype)) => Some(match dtype {
            DataType::Int32 => 1,
            DataType::Float32 => 2,
            DataType::Bool => 4,
            DataType::Int64 => 5,
            DataType::Float16 => 6,
            DataType::Float64 => 7,
        }),
        Type::Tensor(_) | Type::TensorPointer(_) | Type::Pointer(_) => Some(3),
        _ => None,
    }
}

/// Adds a `<name>_packed` host wrapper for every host-callable entry.
///
/// The wrapper takes `(num_args: int32, arg_types: int32*, args: void**)`,
/// checks the argument count and every type code, unpacks the arguments and
/// calls the entry.
#[derive(Debug)]
pub struct PackedFunctions;

fn wrap(entry: &Function) -> Result<Function, PassError> {
    let mut fb = FunctionBuilder::new(format!("{}_packed", entry.name), Worker::Host);
    let num_args = fb.param("num_args", Type::scalar(DataType::Int32));
    let arg_types = fb.param("arg_types", Type::pointer(Type::scalar(DataType::Int32)));
    let args = fb.param("args", Type::pointer(Type::pointer(Type::Void)));

    let n = entry.params.len() as i64;
    let mut body = vec![Stmt::Assert {
        cond: Expr::var(&num_args).eq_to(Expr::int(n)),
        msg: format!("{} expects {n} arguments", entry.name),
    }];
    let mut call_args = Vec::with_capacity(entry.params.len());
    for (i, param) in entry.params.iter().enumerate() {
        let code = type_code(&param.ty).ok_or_else(|| {
            IrError::InvalidOperand(format!(
                "parameter `{}` of `{}` has type {} which cannot be packed",
                param.name, entry.name, param.ty
            ))
        })?;
        let index = Expr::int(i as i64);
        body.push(Stmt::Assert {
            cond: Expr::element(Expr::var(&arg_types), vec![index.clone()]).eq_to(Expr::int(code)),
            msg: format!("argument {i} of {} must have type code {code}", entry.name),
        });
        let raw = Expr::element(Expr::var(&args), vec![index]);
        call_args.push(match &param.ty {
            Type::Tensor(t) | Type::TensorPointer(t) => {
                Expr::cast(raw, Type::pointer(Type::Scalar(t.dtype.clone())))
            }
            Type::Pointer(_) => Expr::cast(raw, param.ty.clone()),
            scalar => Expr::Dereference(Box::new(Expr::cast(raw, Type::pointer(scalar.clone())))),
        });
    }
    body.push(Stmt::Evaluate(Expr::call(entry.name.clone(), call_args)));
    fb.set_body(Stmt::seq(body));
    let mut wrapper = fb.finish();
    wrapper.attrs.packed_func = Some(entry.name.clone());
    Ok(wrapper)
}

impl ModuleTransform for PackedFunctions {
    fn name(&self) -> &str {
        "packed_functions"
    }

    fn stage(&self) -> Stage {
        Stage::Packed
    }

    fn run(&self, mut module: IRModule) -> Result<IRModule, PassError> {
        let mut wrappers = Vec::new();
        for func in module.iter() {
            let is_entry = func.attrs.worker.is_host_callable() && func.attrs.packed_func.is_none();
            if is_entry && !module.contains(&format!("{}_packed", func.name)) {
                wrappers.push(wrap(func)?);
            }
        }
        for wrapper in wrappers {
            log::debug!("packed_functions: adding `{}`", wrapper.name);
            module.add(wrapper)?;
        }
        Ok(module)
    }
}

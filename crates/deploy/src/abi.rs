//! Constructor argument encoding.

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    json_abi::JsonAbi,
    primitives::Bytes,
};
use derive_more::{Deref, From};
use serde_json::Value;

use crate::error::EncodingError;

/// Constructor arguments as textual tokens, in declaration order.
///
/// Tokens are parsed against the constructor's parameter types when encoding, so
/// `"300"`, `"0xA0B1…"` and `"[1,2]"` all work as long as the type allows them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, From)]
pub struct ConstructorArgs(Vec<String>);

impl ConstructorArgs {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Arguments from a JSON array, e.g. `["0xA0B1…", 300, true]`.
    pub fn from_json(value: &Value) -> anyhow::Result<Self> {
        let Value::Array(items) = value else {
            anyhow::bail!("Constructor arguments must be a JSON array");
        };

        items
            .iter()
            .map(json_token)
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Self)
    }
}

fn json_token(value: &Value) -> anyhow::Result<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => {
            let tokens = items.iter().map(json_token).collect::<anyhow::Result<Vec<_>>>()?;
            format!("[{}]", tokens.join(","))
        }
        Value::Null | Value::Object(_) => {
            anyhow::bail!("Unsupported constructor argument `{}`", value)
        }
    })
}

/// ABI-encode `args` against the constructor of `abi`.
///
/// A contract without a constructor accepts no arguments and encodes to nothing.
pub fn encode_constructor_args(abi: &JsonAbi, args: &[String]) -> Result<Bytes, EncodingError> {
    let Some(constructor) = abi.constructor() else {
        if args.is_empty() {
            return Ok(Bytes::new());
        }
        return Err(EncodingError::NoConstructor { got: args.len() });
    };

    if constructor.inputs.len() != args.len() {
        return Err(EncodingError::Arity {
            expected: constructor.inputs.len(),
            got: args.len(),
        });
    }

    let values = constructor
        .inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| {
            let ty = param.resolve().map_err(|source| EncodingError::UnresolvedType {
                index,
                name: param.name.clone(),
                source,
            })?;

            ty.coerce_str(arg).map_err(|source| EncodingError::InvalidArgument {
                index,
                ty: ty.sol_type_name().into_owned(),
                value: arg.clone(),
                source,
            })
        })
        .collect::<Result<Vec<DynSolValue>, _>>()?;

    constructor
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(EncodingError::Abi)
}

/// Creation code followed by the encoded constructor arguments.
pub fn deployment_code(bytecode: &Bytes, encoded_args: &Bytes) -> Bytes {
    bytecode.iter().chain(encoded_args.iter()).copied().collect()
}

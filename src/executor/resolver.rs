//! Dispatch of formal parameters to the registered parameter resolvers.
use super::ExtensionContext;
use crate::{
    errors::{ErrorKind, TestError},
    extension::{CapabilityKind, Extension, ParameterContext, ParameterResolver},
    value::{Parameter, Value},
};
use std::sync::Arc;

/// Resolve every parameter of `executable` against the resolvers registered
/// in `context`'s registry chain.
///
/// Each parameter must be supported by exactly one resolver, and the value it
/// produces must be assignable to the declared type.
pub fn resolve_parameters(
    executable: &str,
    parameters: &[Parameter],
    context: &ExtensionContext,
) -> Result<Vec<Value>, TestError> {
    if parameters.is_empty() {
        return Ok(Vec::new());
    }
    let resolvers = context.registry().extensions(CapabilityKind::ParameterResolver);
    parameters
        .iter()
        .map(|parameter| {
            resolve(
                &ParameterContext {
                    parameter,
                    executable,
                },
                &resolvers,
                context,
            )
        })
        .collect()
}

fn wrap(err: TestError, parameter: &ParameterContext<'_>) -> TestError {
    match err.kind() {
        ErrorKind::Resolution | ErrorKind::Configuration => err,
        _ => TestError::resolution(format!(
            "Failed to resolve parameter [{}] in method [{}]: {}",
            parameter.parameter, parameter.executable, err
        )),
    }
}

fn resolve(
    parameter: &ParameterContext<'_>,
    resolvers: &[Arc<dyn Extension>],
    context: &ExtensionContext,
) -> Result<Value, TestError> {
    let mut matching: Vec<(&Arc<dyn Extension>, &dyn ParameterResolver)> = Vec::new();
    for extension in resolvers {
        if let Some(resolver) = extension.as_parameter_resolver() {
            if resolver
                .supports(parameter, context)
                .map_err(|e| wrap(e, parameter))?
            {
                matching.push((extension, resolver));
            }
        }
    }

    let (extension, resolver) = match matching.as_slice() {
        [] => {
            return Err(TestError::resolution(format!(
                "No ParameterResolver registered for parameter [{}] in method [{}].",
                parameter.parameter, parameter.executable
            )))
        }
        [only] => *only,
        many => {
            let names: Vec<&str> = many.iter().map(|(e, _)| e.name()).collect();
            return Err(TestError::configuration(format!(
                "Discovered multiple competing ParameterResolvers for parameter [{}] in method [{}]: {}",
                parameter.parameter,
                parameter.executable,
                names.join(", ")
            )));
        }
    };

    let value = resolver
        .resolve(parameter, context)
        .map_err(|e| wrap(e, parameter))?;

    let ty = &parameter.parameter.ty;
    if value.is_null() && ty.is_primitive() {
        return Err(TestError::resolution(format!(
            "ParameterResolver [{}] resolved a null value for parameter [{}] in method [{}], but a primitive of type [{}] is required.",
            extension.name(),
            parameter.parameter,
            parameter.executable,
            ty
        )));
    }
    if !ty.accepts(&value) {
        return Err(TestError::resolution(format!(
            "ParameterResolver [{}] resolved a value of type [{}] for parameter [{}] in method [{}], but a value assignment compatible with [{}] is required.",
            extension.name(),
            value.type_name(),
            parameter.parameter,
            parameter.executable,
            ty
        )));
    }
    tracing::trace!(
        parameter = %parameter.parameter,
        executable = parameter.executable,
        resolver = extension.name(),
        "resolved parameter"
    );
    Ok(value)
}

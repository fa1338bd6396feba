//! The custom-type encoder registry.
//!
//! A `Value::Custom` reaching the renderer is looked up here by its type
//! name; the encoder returns another `Value`, which may itself be
//! `Custom` and is resolved recursively until a primitive is reached or the
//! recursion guard trips.

use crate::value::Value;
use riverdb_common::Error;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry lookups must terminate; this bounds the number of recursive
/// `Custom -> Custom` resolutions before giving up, so a self-referential
/// encoder chain fails closed instead of needing full cycle tracking.
const MAX_RESOLUTION_DEPTH: usize = 16;

type Encoder = Arc<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;

/// A mapping from value kind (by type name) to an encoder that turns it
/// into another `Value`.
#[derive(Clone, Default)]
pub struct ValueEncoderRegistry {
    encoders: HashMap<&'static str, Encoder>,
}

impl ValueEncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an encoder for values tagged with `type_name` (the same
    /// name passed as the second field of `Value::Custom`).
    pub fn register<F>(&mut self, type_name: &'static str, encoder: F) -> &mut Self
    where
        F: Fn(&dyn Any) -> Option<Value> + Send + Sync + 'static,
    {
        self.encoders.insert(type_name, Arc::new(encoder));
        self
    }

    /// Registers an encoder for enum-like values that render by their
    /// textual variant name.
    pub fn register_enum<T, F>(&mut self, type_name: &'static str, to_name: F) -> &mut Self
    where
        T: 'static,
        F: Fn(&T) -> &'static str + Send + Sync + 'static,
    {
        self.register(type_name, move |any| {
            any.downcast_ref::<T>().map(|v| Value::Str(to_name(v).to_string()))
        })
    }

    /// Resolves a value to a primitive, recursively following `Custom`
    /// encoders. Fails with `NamedParameterTypeNotSupported` if no encoder
    /// is registered for the value's kind, or if resolution doesn't reach a
    /// primitive within `MAX_RESOLUTION_DEPTH` steps.
    pub fn resolve(&self, value: Value) -> Result<Value, Error> {
        let mut current = value;
        for _ in 0..MAX_RESOLUTION_DEPTH {
            match current {
                Value::Custom(boxed, type_name) => {
                    let encoder = self.encoders.get(type_name).ok_or_else(|| {
                        Error::NamedParameterTypeNotSupported(type_name.to_string())
                    })?;
                    current = encoder(boxed.as_ref()).ok_or_else(|| {
                        Error::NamedParameterTypeNotSupported(type_name.to_string())
                    })?;
                }
                resolved => return Ok(resolved),
            }
        }
        Err(Error::NamedParameterTypeNotSupported(
            "encoder resolution exceeded maximum depth (possible cycle)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    enum Color {
        Red,
        Green,
    }

    #[test]
    fn unregistered_custom_type_fails() {
        let registry = ValueEncoderRegistry::new();
        let value = Value::Custom(Arc::new(Color::Red), "Color");
        let err = registry.resolve(value).unwrap_err();
        assert!(matches!(err, Error::NamedParameterTypeNotSupported(_)));
    }

    #[test]
    fn enum_resolves_to_its_textual_name() {
        let mut registry = ValueEncoderRegistry::new();
        registry.register_enum::<Color, _>("Color", |c| match c {
            Color::Red => "RED",
            Color::Green => "GREEN",
        });

        let resolved = registry
            .resolve(Value::Custom(Arc::new(Color::Green), "Color"))
            .unwrap();
        match resolved {
            Value::Str(s) => assert_eq!(s, "GREEN"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn chained_custom_encoders_resolve_recursively() {
        let mut registry = ValueEncoderRegistry::new();
        registry.register("Wrapper", |any| {
            any.downcast_ref::<u8>()
                .map(|v| Value::Custom(Arc::new(*v as i32), "Inner"))
        });
        registry.register("Inner", |any| any.downcast_ref::<i32>().map(|v| Value::Int(*v)));

        let resolved = registry
            .resolve(Value::Custom(Arc::new(7u8), "Wrapper"))
            .unwrap();
        assert!(matches!(resolved, Value::Int(7)));
    }

    #[test]
    fn self_referential_encoder_fails_closed_instead_of_looping() {
        let mut registry = ValueEncoderRegistry::new();
        registry.register("Loop", |any| {
            any.downcast_ref::<()>().map(|_| Value::Custom(Arc::new(()), "Loop"))
        });

        let err = registry
            .resolve(Value::Custom(Arc::new(()), "Loop"))
            .unwrap_err();
        assert!(matches!(err, Error::NamedParameterTypeNotSupported(_)));
    }

    #[test]
    fn primitive_value_passes_through_unchanged() {
        let registry = ValueEncoderRegistry::new();
        let resolved = registry.resolve(Value::Int(42)).unwrap();
        assert!(matches!(resolved, Value::Int(42)));
    }
}

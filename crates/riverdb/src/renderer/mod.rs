//! The parameterized-statement renderer.
//!
//! A [`Statement`] is a mutable builder over a SQL template: it is lexed
//! once at construction time and can be rendered repeatedly, either to a
//! dialect-native string with an ordered value list (`render_native`) or to
//! a fully literal-substituted string (`render_literal`).

mod lexer;
mod literal;

use crate::encoder::ValueEncoderRegistry;
use crate::value::{CollectionExpansion, Dialect, Value};
use lexer::{lex, Segment};
use riverdb_common::Error;
use std::collections::{HashMap, HashSet};

/// The output of [`Statement::render_native`]: dialect-native SQL plus an
/// ordered list of values to bind to its markers.
#[derive(Debug, Clone)]
pub struct NativeStatement {
    pub sql: String,
    pub values: Vec<Value>,
}

/// A mutable SQL statement builder supporting positional (`?`) and named
/// (`:name`) placeholders.
pub struct Statement {
    segments: Vec<Segment>,
    declared_positions: usize,
    declared_names: HashSet<String>,
    positional_values: HashMap<usize, Value>,
    named_values: HashMap<String, Value>,
    next_auto_position: usize,
}

impl Statement {
    /// Lexes `sql` and returns an unbound statement.
    pub fn new(sql: impl Into<String>) -> Self {
        let lexed = lex(&sql.into());
        Self {
            segments: lexed.segments,
            declared_positions: lexed.declared_positions,
            declared_names: lexed.declared_names,
            positional_values: HashMap::new(),
            named_values: HashMap::new(),
            next_auto_position: 0,
        }
    }

    /// Number of distinct `?` occurrences declared in the template.
    pub fn declared_positions(&self) -> usize {
        self.declared_positions
    }

    /// Distinct `:name` placeholders declared in the template.
    pub fn declared_names(&self) -> &HashSet<String> {
        &self.declared_names
    }

    /// Binds a value to a declared positional index. Rebinding the same
    /// index overwrites the prior value.
    pub fn bind_positional(
        &mut self,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<&mut Self, Error> {
        if index >= self.declared_positions {
            return Err(Error::PositionalParameterOutOfBounds(index));
        }
        self.positional_values.insert(index, value.into());
        Ok(self)
    }

    /// Binds a value to the next undeclared positional slot, in order.
    /// Equivalent to calling `bind_positional` with an internally tracked
    /// auto-incrementing counter.
    pub fn bind(&mut self, value: impl Into<Value>) -> Result<&mut Self, Error> {
        let index = self.next_auto_position;
        self.next_auto_position += 1;
        self.bind_positional(index, value)
    }

    /// Binds a value to a declared named placeholder. Rebinding the same
    /// name overwrites the prior value.
    pub fn bind_named(
        &mut self,
        name: impl AsRef<str>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, Error> {
        let name = name.as_ref();
        if !self.declared_names.contains(name) {
            return Err(Error::NamedParameterNotFound(name.to_string()));
        }
        self.named_values.insert(name.to_string(), value.into());
        Ok(self)
    }

    fn positional_value(&self, index: usize) -> Result<Value, Error> {
        self.positional_values
            .get(&index)
            .cloned()
            .ok_or(Error::PositionalParameterValueNotSupplied(index))
    }

    fn named_value(&self, name: &str) -> Result<Value, Error> {
        self.named_values
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NamedParameterValueNotSupplied(name.to_string()))
    }

    /// Renders dialect-native SQL (`$1, $2, ...` for PostgreSQL; bare `?`
    /// for MySQL/SQLite) plus the ordered values to bind. Each `?`
    /// occurrence consumes the next declared positional value; each
    /// `:name` occurrence resolves the same bound value but allocates its
    /// own native parameter slot. Collections expand to consecutive slots.
    pub fn render_native(
        &self,
        dialect: Dialect,
        registry: &ValueEncoderRegistry,
    ) -> Result<NativeStatement, Error> {
        let mut sql = String::new();
        let mut values = Vec::new();
        let mut next_ordinal = 1usize;

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Positional(index) => {
                    let value = self.positional_value(*index)?;
                    self.render_native_occurrence(value, registry, dialect, &mut sql, &mut values, &mut next_ordinal)?;
                }
                Segment::Named(name) => {
                    let value = self.named_value(name)?;
                    self.render_native_occurrence(value, registry, dialect, &mut sql, &mut values, &mut next_ordinal)?;
                }
            }
        }

        Ok(NativeStatement { sql, values })
    }

    #[allow(clippy::too_many_arguments)]
    fn render_native_occurrence(
        &self,
        value: Value,
        registry: &ValueEncoderRegistry,
        dialect: Dialect,
        sql: &mut String,
        values: &mut Vec<Value>,
        next_ordinal: &mut usize,
    ) -> Result<(), Error> {
        let resolved = if value.is_primitive() { value } else { registry.resolve(value)? };

        match resolved {
            Value::Array(items, mode) => {
                let markers: Vec<String> = items
                    .into_iter()
                    .map(|item| {
                        let resolved_item = if item.is_primitive() { Ok(item) } else { registry.resolve(item) }?;
                        let marker = dialect.native_marker(*next_ordinal);
                        *next_ordinal += 1;
                        values.push(resolved_item);
                        Ok(marker)
                    })
                    .collect::<Result<_, Error>>()?;

                match mode {
                    CollectionExpansion::Wrapped => {
                        sql.push('(');
                        sql.push_str(&markers.join(", "));
                        sql.push(')');
                    }
                    CollectionExpansion::NoWrappingTuple | CollectionExpansion::NoQuotingString => {
                        sql.push_str(&markers.join(", "));
                    }
                }
            }
            scalar => {
                sql.push_str(&dialect.native_marker(*next_ordinal));
                *next_ordinal += 1;
                values.push(scalar);
            }
        }
        Ok(())
    }

    /// Renders SQL with every placeholder replaced by an encoded literal.
    pub fn render_literal(&self, dialect: Dialect, registry: &ValueEncoderRegistry) -> Result<String, Error> {
        let mut sql = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Positional(index) => {
                    let value = self.positional_value(*index)?;
                    sql.push_str(&self.render_literal_occurrence(value, registry, dialect)?);
                }
                Segment::Named(name) => {
                    let value = self.named_value(name)?;
                    sql.push_str(&self.render_literal_occurrence(value, registry, dialect)?);
                }
            }
        }

        Ok(sql)
    }

    fn render_literal_occurrence(
        &self,
        value: Value,
        registry: &ValueEncoderRegistry,
        dialect: Dialect,
    ) -> Result<String, Error> {
        let resolved = if value.is_primitive() { value } else { registry.resolve(value)? };

        match resolved {
            Value::Array(items, mode) => {
                let encoded: Vec<String> = items
                    .into_iter()
                    .map(|item| {
                        let resolved_item = if item.is_primitive() { Ok(item) } else { registry.resolve(item) }?;
                        Ok(literal::encode_scalar_literal(&resolved_item, dialect))
                    })
                    .collect::<Result<_, Error>>()?;

                Ok(match mode {
                    CollectionExpansion::Wrapped => format!("({})", encoded.join(", ")),
                    CollectionExpansion::NoWrappingTuple => encoded.join(", "),
                    CollectionExpansion::NoQuotingString => items_as_raw_strings(&encoded),
                })
            }
            scalar => Ok(literal::encode_scalar_literal(&scalar, dialect)),
        }
    }
}

/// `NoQuotingString` elements are rendered without quoting; the literal
/// encoder already quoted them as strings, so strip the surrounding quotes
/// back off (this mode is only meaningful for `Value::Str` elements, e.g.
/// library-constructed identifiers).
fn items_as_raw_strings(encoded: &[String]) -> String {
    encoded
        .iter()
        .map(|s| s.trim_matches('\'').replace("''", "'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ValueEncoderRegistry {
        ValueEncoderRegistry::new()
    }

    #[test]
    fn positional_and_named_cast_example_renders_native() {
        let mut stmt = Statement::new("SELECT ?::int, :v::text");
        stmt.bind_positional(0, 42).unwrap();
        stmt.bind_named("v", "hi").unwrap();

        let rendered = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(rendered.sql, "SELECT $1::int, $2::text");
        assert_eq!(rendered.values.len(), 2);
        assert!(matches!(rendered.values[0], Value::Int(42)));
        match &rendered.values[1] {
            Value::Str(s) => assert_eq!(s, "hi"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn in_clause_list_expands_to_n_slots() {
        let mut stmt = Statement::new("SELECT x FROM t WHERE x IN ?");
        stmt.bind_positional(0, vec![10i32, 20, 30]).unwrap();

        let rendered = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(rendered.sql, "SELECT x FROM t WHERE x IN ($1, $2, $3)");
        assert_eq!(rendered.values.len(), 3);
    }

    #[test]
    fn no_wrapping_tuple_produces_no_outer_parens() {
        let mut stmt = Statement::new("SELECT ARRAY[?]::int[]");
        let mut value = Value::Array(vec![Value::Int(1), Value::Int(2)], CollectionExpansion::NoWrappingTuple);
        if let Value::Array(_, mode) = &mut value {
            *mode = CollectionExpansion::NoWrappingTuple;
        }
        stmt.bind_positional(0, value).unwrap();

        let rendered = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(rendered.sql, "SELECT ARRAY[$1, $2]::int[]");
    }

    #[test]
    fn repeated_named_parameter_reuses_bound_value_with_fresh_slots() {
        let mut stmt = Statement::new(":x + :x");
        stmt.bind_named("x", 5i32).unwrap();

        let rendered = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(rendered.sql, "$1 + $2");
        assert_eq!(rendered.values.len(), 2);
        assert!(matches!(rendered.values[0], Value::Int(5)));
        assert!(matches!(rendered.values[1], Value::Int(5)));
    }

    #[test]
    fn mysql_and_sqlite_use_bare_question_marks() {
        let mut stmt = Statement::new("SELECT ?, :n");
        stmt.bind_positional(0, 1i32).unwrap();
        stmt.bind_named("n", 2i32).unwrap();

        let rendered = stmt.render_native(Dialect::MySql, &registry()).unwrap();
        assert_eq!(rendered.sql, "SELECT ?, ?");
    }

    #[test]
    fn unbound_positional_fails_with_value_not_supplied() {
        let stmt = Statement::new("SELECT ?");
        let err = stmt.render_native(Dialect::Postgres, &registry()).unwrap_err();
        assert!(matches!(err, Error::PositionalParameterValueNotSupplied(0)));
    }

    #[test]
    fn unbound_named_fails_with_value_not_supplied() {
        let stmt = Statement::new("SELECT :v");
        let err = stmt.render_native(Dialect::Postgres, &registry()).unwrap_err();
        assert!(matches!(err, Error::NamedParameterValueNotSupplied(ref n) if n == "v"));
    }

    #[test]
    fn binding_undeclared_name_fails() {
        let mut stmt = Statement::new("SELECT 1");
        let err = stmt.bind_named("missing", 1i32).unwrap_err();
        assert!(matches!(err, Error::NamedParameterNotFound(ref n) if n == "missing"));
    }

    #[test]
    fn binding_out_of_range_positional_fails() {
        let mut stmt = Statement::new("SELECT ?");
        let err = stmt.bind_positional(5, 1i32).unwrap_err();
        assert!(matches!(err, Error::PositionalParameterOutOfBounds(5)));
    }

    #[test]
    fn rebinding_a_position_overwrites_the_previous_value() {
        let mut stmt = Statement::new("SELECT ?");
        stmt.bind_positional(0, 1i32).unwrap();
        stmt.bind_positional(0, 2i32).unwrap();

        let rendered = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        assert!(matches!(rendered.values[0], Value::Int(2)));
    }

    #[test]
    fn literal_mode_substitutes_quoted_strings() {
        let mut stmt = Statement::new("SELECT * FROM t WHERE name = :name");
        stmt.bind_named("name", "O'Brien").unwrap();

        let rendered = stmt.render_literal(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(rendered, "SELECT * FROM t WHERE name = 'O''Brien'");
    }

    #[test]
    fn literal_mode_in_clause_renders_parenthesized_list() {
        let mut stmt = Statement::new("SELECT x FROM t WHERE x IN ?");
        stmt.bind_positional(0, vec![1i32, 2, 3]).unwrap();

        let rendered = stmt.render_literal(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(rendered, "SELECT x FROM t WHERE x IN (1, 2, 3)");
    }

    #[test]
    fn statement_can_be_rendered_repeatedly() {
        let mut stmt = Statement::new("SELECT ?");
        stmt.bind_positional(0, 1i32).unwrap();
        let first = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        let second = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(first.sql, second.sql);
    }

    #[test]
    fn bind_auto_increments_positional_index() {
        let mut stmt = Statement::new("SELECT ?, ?");
        stmt.bind(1i32).unwrap();
        stmt.bind(2i32).unwrap();

        let rendered = stmt.render_native(Dialect::Postgres, &registry()).unwrap();
        assert_eq!(rendered.sql, "SELECT $1, $2");
    }
}

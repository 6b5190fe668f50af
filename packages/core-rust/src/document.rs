//! Owned operation document AST.
//!
//! Documents are parsed with `graphql-parser` and immediately lowered into
//! this smaller tree, which keeps only what classification, validation and
//! argument extraction look at: operation type, variable definitions, root
//! fields and their arguments. Nested selections are not retained.

use std::collections::BTreeMap;
use std::fmt;

use graphql_parser::query as gql;
use graphql_parser::Pos;
use serde_json::{Map, Value};

use crate::messages::{ErrorCode, GraphQlError, SourceLocation};
use crate::operation::OperationKind;

/// Operation type keyword of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl OperationType {
    /// Maps the document keyword onto what the operation does.
    #[must_use]
    pub fn kind(self) -> OperationKind {
        match self {
            Self::Query => OperationKind::Read,
            Self::Mutation => OperationKind::Write,
            Self::Subscription => OperationKind::Subscribe,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed document: its top-level definitions in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub definitions: Vec<Definition>,
}

impl Document {
    /// The first top-level operation definition, if the document starts with one.
    ///
    /// Only the first definition is ever considered; a document that starts
    /// with a fragment yields `None` even if an operation follows.
    #[must_use]
    pub fn first_operation(&self) -> Option<&OperationDefinition> {
        match self.definitions.first() {
            Some(Definition::Operation(op)) => Some(op),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Operation(OperationDefinition),
    Fragment {
        name: String,
        position: SourceLocation,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    pub operation_type: OperationType,
    pub name: Option<String>,
    pub position: SourceLocation,
    pub variables: Vec<VariableDefinition>,
    /// Root fields, in source order.
    pub fields: Vec<FieldSelection>,
    /// Whether the root selection set spreads fragments.
    pub has_root_fragments: bool,
}

impl OperationDefinition {
    #[must_use]
    pub fn first_field(&self) -> Option<&FieldSelection> {
        self.fields.first()
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSelection> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Names of every variable referenced by a root field argument, in
    /// first-use order, without duplicates.
    #[must_use]
    pub fn referenced_variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for argument in self.fields.iter().flat_map(|f| &f.arguments) {
            argument.value.collect_variables(&mut names);
        }
        names
    }
}

/// `$name: Type = default` in an operation header.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    /// Rendered type, e.g. `String!`.
    pub type_name: String,
    pub has_default: bool,
    pub position: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelection {
    pub name: String,
    pub alias: Option<String>,
    pub position: SourceLocation,
    pub arguments: Vec<Argument>,
}

impl FieldSelection {
    /// Key under which this field appears in a response object.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&ArgumentValue> {
        self.arguments
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: ArgumentValue,
}

/// Literal or variable reference given as an argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<ArgumentValue>),
    Object(BTreeMap<String, ArgumentValue>),
}

impl ArgumentValue {
    /// Resolves variables against the request's variable map.
    ///
    /// Returns `None` when a referenced variable was not supplied.
    #[must_use]
    pub fn resolve(&self, variables: Option<&Map<String, Value>>) -> Option<Value> {
        match self {
            Self::Variable(name) => variables.and_then(|vars| vars.get(name)).cloned(),
            Self::Int(n) => Some(Value::from(*n)),
            Self::Float(f) => Some(serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)),
            Self::String(s) | Self::Enum(s) => Some(Value::String(s.clone())),
            Self::Boolean(b) => Some(Value::Bool(*b)),
            Self::Null => Some(Value::Null),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(variables))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Object(fields) => fields
                .iter()
                .map(|(k, v)| v.resolve(variables).map(|v| (k.clone(), v)))
                .collect::<Option<Map<_, _>>>()
                .map(Value::Object),
        }
    }

    fn collect_variables<'a>(&'a self, into: &mut Vec<&'a str>) {
        match self {
            Self::Variable(name) => {
                if !into.contains(&name.as_str()) {
                    into.push(name.as_str());
                }
            }
            Self::List(items) => items.iter().for_each(|item| item.collect_variables(into)),
            Self::Object(fields) => fields.values().for_each(|v| v.collect_variables(into)),
            _ => {}
        }
    }

    /// Resolves to a string, if the resolved value is one.
    #[must_use]
    pub fn resolve_string(&self, variables: Option<&Map<String, Value>>) -> Option<String> {
        match self.resolve(variables)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Prints the value as it would appear in a document.
impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "${name}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Null => f.write_str("null"),
            Self::Enum(name) => f.write_str(name),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Parses document text into the owned AST.
///
/// # Errors
///
/// Returns a single `GRAPHQL_PARSE_FAILED` error when the text is not a
/// syntactically valid executable document.
pub fn parse_document(text: &str) -> Result<Document, GraphQlError> {
    let parsed = gql::parse_query::<String>(text).map_err(|e| {
        GraphQlError::new(ErrorCode::ParseFailed, format!("Syntax Error: {e}"))
    })?;

    Ok(Document {
        definitions: parsed
            .definitions
            .into_iter()
            .map(lower_definition)
            .collect(),
    })
}

fn location(pos: Pos) -> SourceLocation {
    SourceLocation {
        line: pos.line,
        column: pos.column,
    }
}

fn lower_definition(def: gql::Definition<'_, String>) -> Definition {
    match def {
        gql::Definition::Operation(op) => Definition::Operation(lower_operation(op)),
        gql::Definition::Fragment(frag) => Definition::Fragment {
            name: frag.name,
            position: location(frag.position),
        },
    }
}

fn lower_operation(op: gql::OperationDefinition<'_, String>) -> OperationDefinition {
    let (operation_type, name, position, variables, selection_set) = match op {
        gql::OperationDefinition::SelectionSet(set) => {
            (OperationType::Query, None, location(set.span.0), Vec::new(), set)
        }
        gql::OperationDefinition::Query(q) => (
            OperationType::Query,
            q.name,
            location(q.position),
            q.variable_definitions,
            q.selection_set,
        ),
        gql::OperationDefinition::Mutation(m) => (
            OperationType::Mutation,
            m.name,
            location(m.position),
            m.variable_definitions,
            m.selection_set,
        ),
        gql::OperationDefinition::Subscription(s) => (
            OperationType::Subscription,
            s.name,
            location(s.position),
            s.variable_definitions,
            s.selection_set,
        ),
    };
    let variables = variables
        .into_iter()
        .map(|var| VariableDefinition {
            type_name: render_type(&var.var_type),
            has_default: var.default_value.is_some(),
            position: location(var.position),
            name: var.name,
        })
        .collect();

    let mut fields = Vec::new();
    let mut has_root_fragments = false;
    for selection in selection_set.items {
        match selection {
            gql::Selection::Field(field) => fields.push(lower_field(field)),
            gql::Selection::FragmentSpread(_) | gql::Selection::InlineFragment(_) => {
                has_root_fragments = true;
            }
        }
    }

    OperationDefinition {
        operation_type,
        name,
        position,
        variables,
        fields,
        has_root_fragments,
    }
}

fn render_type(ty: &gql::Type<'_, String>) -> String {
    match ty {
        gql::Type::NamedType(name) => name.clone(),
        gql::Type::ListType(inner) => format!("[{}]", render_type(inner)),
        gql::Type::NonNullType(inner) => format!("{}!", render_type(inner)),
    }
}

fn lower_field(field: gql::Field<'_, String>) -> FieldSelection {
    FieldSelection {
        name: field.name,
        alias: field.alias,
        position: location(field.position),
        arguments: field
            .arguments
            .into_iter()
            .map(|(name, value)| Argument {
                name,
                value: lower_value(value),
            })
            .collect(),
    }
}

fn lower_value(value: gql::Value<'_, String>) -> ArgumentValue {
    match value {
        gql::Value::Variable(name) => ArgumentValue::Variable(name),
        gql::Value::Int(n) => ArgumentValue::Int(n.as_i64().unwrap_or_default()),
        gql::Value::Float(f) => ArgumentValue::Float(f),
        gql::Value::String(s) => ArgumentValue::String(s),
        gql::Value::Boolean(b) => ArgumentValue::Boolean(b),
        gql::Value::Null => ArgumentValue::Null,
        gql::Value::Enum(e) => ArgumentValue::Enum(e),
        gql::Value::List(items) => {
            ArgumentValue::List(items.into_iter().map(lower_value).collect())
        }
        gql::Value::Object(map) => ArgumentValue::Object(
            map.into_iter().map(|(k, v)| (k, lower_value(v))).collect(),
        ),
    }
}

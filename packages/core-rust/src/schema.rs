//! Operation schema loaded from SDL and the document validator built on it.

use std::collections::HashMap;

use graphql_parser::schema as sdl;
use thiserror::Error;

use crate::document::{
    ArgumentValue, Definition, Document, OperationDefinition, OperationType, VariableDefinition,
};
use crate::messages::{ErrorCode, GraphQlError};

/// Schema served by default: a chat room where writes are translated and
/// pushed to everyone subscribed to the room.
pub const CHAT_SCHEMA_SDL: &str = r"
type EventDetails {
  EventId: String
  ErrorMessage: String
  ErrorCode: String
}

type Mutation {
  putEvent(message: String!, chatId: String!): Result
}

type Query {
  getEvent: String
}

type Result {
  Entries: [EventDetails]
  FailedEntries: Int
}

type Subscription {
  chat(chatId: String!): String
}

schema {
  query: Query
  mutation: Mutation
  subscription: Subscription
}
";

/// Errors raised while loading a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema parse error: {0}")]
    Parse(String),
    #[error("root type `{0}` is referenced but not defined")]
    MissingRootType(String),
}

/// Declared argument of a root field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSignature {
    pub name: String,
    /// Rendered type, e.g. `String!`.
    pub type_name: String,
    /// Non-null and without a default value.
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSignature {
    pub name: String,
    pub arguments: Vec<ArgumentSignature>,
}

/// Object type bound to one operation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootType {
    pub name: String,
    pub fields: HashMap<String, FieldSignature>,
}

/// The root operation types of a schema with their field signatures.
///
/// Only root fields are modelled; nested selection sets are accepted as
/// written.
#[derive(Debug, Clone, Default)]
pub struct OperationSchema {
    roots: HashMap<OperationType, RootType>,
}

impl OperationSchema {
    /// Loads the default chat schema.
    ///
    /// # Errors
    ///
    /// Never fails for the bundled SDL; the `Result` mirrors [`Self::from_sdl`].
    pub fn chat() -> Result<Self, SchemaError> {
        Self::from_sdl(CHAT_SCHEMA_SDL)
    }

    /// Builds a schema from SDL text.
    ///
    /// Root types come from the `schema { .. }` block when present, otherwise
    /// from object types named `Query`, `Mutation` and `Subscription`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] for invalid SDL and
    /// [`SchemaError::MissingRootType`] when the schema block names a type
    /// that is not defined.
    pub fn from_sdl(text: &str) -> Result<Self, SchemaError> {
        let parsed = sdl::parse_schema::<String>(text)
            .map_err(|e| SchemaError::Parse(e.to_string()))?;

        let mut objects: HashMap<String, Vec<sdl::Field<'_, String>>> = HashMap::new();
        let mut root_names: Option<[Option<String>; 3]> = None;

        for definition in parsed.definitions {
            match definition {
                sdl::Definition::SchemaDefinition(schema) => {
                    root_names = Some([schema.query, schema.mutation, schema.subscription]);
                }
                sdl::Definition::TypeDefinition(sdl::TypeDefinition::Object(object)) => {
                    objects.insert(object.name, object.fields);
                }
                _ => {}
            }
        }

        let explicit = root_names.is_some();
        let [query, mutation, subscription] = root_names.unwrap_or_else(|| {
            [
                Some("Query".to_string()),
                Some("Mutation".to_string()),
                Some("Subscription".to_string()),
            ]
        });

        let mut roots = HashMap::new();
        for (operation_type, name) in [
            (OperationType::Query, query),
            (OperationType::Mutation, mutation),
            (OperationType::Subscription, subscription),
        ] {
            let Some(name) = name else { continue };
            match objects.remove(&name) {
                Some(fields) => {
                    roots.insert(operation_type, root_type(name, fields));
                }
                None if explicit => return Err(SchemaError::MissingRootType(name)),
                None => {}
            }
        }

        Ok(Self { roots })
    }

    #[must_use]
    pub fn root_type(&self, operation_type: OperationType) -> Option<&RootType> {
        self.roots.get(&operation_type)
    }

    /// Validates a parsed document against this schema.
    ///
    /// Returns every violation found; an empty list means the document is
    /// valid. Only the first definition of the document is checked.
    #[must_use]
    pub fn validate(&self, document: &Document) -> Vec<GraphQlError> {
        match document.definitions.first() {
            Some(Definition::Operation(op)) => self.validate_operation(op),
            Some(Definition::Fragment { name, position }) => vec![GraphQlError::new(
                ErrorCode::ValidationFailed,
                format!("Document must start with an operation, found fragment \"{name}\"."),
            )
            .at(position.line, position.column)],
            None => vec![GraphQlError::new(
                ErrorCode::ValidationFailed,
                "Document does not contain any operation.",
            )],
        }
    }

    fn validate_operation(&self, op: &OperationDefinition) -> Vec<GraphQlError> {
        let Some(root) = self.root_type(op.operation_type) else {
            return vec![GraphQlError::new(
                ErrorCode::ValidationFailed,
                format!(
                    "Schema is not configured to execute {} operation.",
                    op.operation_type
                ),
            )
            .at(op.position.line, op.position.column)];
        };

        let mut errors = Vec::new();

        if op.has_root_fragments {
            errors.push(
                GraphQlError::new(
                    ErrorCode::ValidationFailed,
                    "Fragments are not supported at the operation root.",
                )
                .at(op.position.line, op.position.column),
            );
        }

        if op.operation_type == OperationType::Subscription && op.fields.len() > 1 {
            let label = op.name.as_deref().map_or_else(
                || "Anonymous Subscription".to_string(),
                |n| format!("Subscription \"{n}\""),
            );
            errors.push(
                GraphQlError::new(
                    ErrorCode::ValidationFailed,
                    format!("{label} must select only one top level field."),
                )
                .at(op.position.line, op.position.column),
            );
        }

        for field in &op.fields {
            if field.name == "__typename" {
                continue;
            }
            let Some(signature) = root.fields.get(&field.name) else {
                errors.push(
                    GraphQlError::new(
                        ErrorCode::ValidationFailed,
                        format!(
                            "Cannot query field \"{}\" on type \"{}\".",
                            field.name, root.name
                        ),
                    )
                    .at(field.position.line, field.position.column),
                );
                continue;
            };

            for arg in &field.arguments {
                let at = |message: String| {
                    GraphQlError::new(ErrorCode::ValidationFailed, message)
                        .at(field.position.line, field.position.column)
                };
                let Some(declared) = signature.arguments.iter().find(|a| a.name == arg.name) else {
                    errors.push(at(format!(
                        "Unknown argument \"{}\" on field \"{}.{}\".",
                        arg.name, root.name, field.name
                    )));
                    continue;
                };
                if let Some(message) = literal_mismatch(&arg.value, &declared.type_name) {
                    errors.push(at(message));
                }
                if let ArgumentValue::Variable(var) = &arg.value {
                    if let Some(definition) = op.variable(var) {
                        if !variable_fits(definition, &declared.type_name) {
                            errors.push(at(format!(
                                "Variable \"${var}\" of type \"{}\" used in position expecting type \"{}\".",
                                definition.type_name, declared.type_name
                            )));
                        }
                    }
                }
            }

            for declared in signature.arguments.iter().filter(|a| a.required) {
                if field.argument(&declared.name).is_none() {
                    errors.push(
                        GraphQlError::new(
                            ErrorCode::ValidationFailed,
                            format!(
                                "Field \"{}\" argument \"{}\" of type \"{}\" is required, but it was not provided.",
                                field.name, declared.name, declared.type_name
                            ),
                        )
                        .at(field.position.line, field.position.column),
                    );
                }
            }
        }

        errors.extend(variable_errors(op));
        errors
    }
}

/// Undefined and unused variables.
fn variable_errors(op: &OperationDefinition) -> Vec<GraphQlError> {
    let used = op.referenced_variables();
    let mut errors = Vec::new();

    for name in &used {
        if op.variable(name).is_none() {
            let message = match &op.name {
                Some(op_name) => {
                    format!("Variable \"${name}\" is not defined by operation \"{op_name}\".")
                }
                None => format!("Variable \"${name}\" is not defined."),
            };
            errors.push(
                GraphQlError::new(ErrorCode::ValidationFailed, message)
                    .at(op.position.line, op.position.column),
            );
        }
    }
    for definition in &op.variables {
        if !used.contains(&definition.name.as_str()) {
            let message = match &op.name {
                Some(op_name) => format!(
                    "Variable \"${}\" is never used in operation \"{op_name}\".",
                    definition.name
                ),
                None => format!("Variable \"${}\" is never used.", definition.name),
            };
            errors.push(
                GraphQlError::new(ErrorCode::ValidationFailed, message)
                    .at(definition.position.line, definition.position.column),
            );
        }
    }
    errors
}

/// Checks a literal against a rendered input type such as `String!` or
/// `[Int]`. Variables are checked separately; unknown named types accept
/// anything.
fn literal_mismatch(value: &ArgumentValue, type_name: &str) -> Option<String> {
    let (inner, non_null) = match type_name.strip_suffix('!') {
        Some(inner) => (inner, true),
        None => (type_name, false),
    };
    match value {
        ArgumentValue::Variable(_) => None,
        ArgumentValue::Null if non_null => {
            Some(format!("Expected value of type \"{type_name}\", found null."))
        }
        ArgumentValue::Null => None,
        _ => match inner.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            Some(item_type) => match value {
                ArgumentValue::List(items) => {
                    items.iter().find_map(|item| literal_mismatch(item, item_type))
                }
                single => literal_mismatch(single, item_type),
            },
            None => scalar_mismatch(value, inner),
        },
    }
}

fn scalar_mismatch(value: &ArgumentValue, scalar: &str) -> Option<String> {
    use ArgumentValue as V;

    let (fits, message) = match scalar {
        "String" => (
            matches!(value, V::String(_)),
            "String cannot represent a non string value",
        ),
        "Int" => (matches!(value, V::Int(_)), "Int cannot represent non-integer value"),
        "Float" => (
            matches!(value, V::Int(_) | V::Float(_)),
            "Float cannot represent non numeric value",
        ),
        "Boolean" => (
            matches!(value, V::Boolean(_)),
            "Boolean cannot represent a non boolean value",
        ),
        "ID" => (
            matches!(value, V::String(_) | V::Int(_)),
            "ID cannot represent a non-string and non-integer value",
        ),
        _ => return None,
    };
    (!fits).then(|| format!("{message}: {value}"))
}

/// A variable of the same type always fits. A non-null variable also fits
/// a nullable position, and a nullable variable with a default fits a
/// non-null one.
fn variable_fits(variable: &VariableDefinition, expected: &str) -> bool {
    if variable.type_name == expected {
        return true;
    }
    match expected.strip_suffix('!') {
        Some(nullable) => variable.has_default && variable.type_name == nullable,
        None => variable.type_name.strip_suffix('!') == Some(expected),
    }
}

fn root_type(name: String, fields: Vec<sdl::Field<'_, String>>) -> RootType {
    let fields = fields
        .into_iter()
        .map(|field| {
            let arguments = field
                .arguments
                .into_iter()
                .map(|input| ArgumentSignature {
                    required: matches!(input.value_type, sdl::Type::NonNullType(_))
                        && input.default_value.is_none(),
                    type_name: render_type(&input.value_type),
                    name: input.name,
                })
                .collect();
            (
                field.name.clone(),
                FieldSignature {
                    name: field.name,
                    arguments,
                },
            )
        })
        .collect();
    RootType { name, fields }
}

fn render_type(ty: &sdl::Type<'_, String>) -> String {
    match ty {
        sdl::Type::NamedType(name) => name.clone(),
        sdl::Type::ListType(inner) => format!("[{}]", render_type(inner)),
        sdl::Type::NonNullType(inner) => format!("{}!", render_type(inner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;

    fn chat() -> OperationSchema {
        OperationSchema::chat().unwrap()
    }

    fn errors_for(text: &str) -> Vec<GraphQlError> {
        chat().validate(&parse_document(text).unwrap())
    }

    #[test]
    fn chat_schema_has_all_three_roots() {
        let schema = chat();
        assert_eq!(schema.root_type(OperationType::Query).unwrap().name, "Query");
        let mutation = schema.root_type(OperationType::Mutation).unwrap();
        let put = &mutation.fields["putEvent"];
        assert_eq!(put.arguments.len(), 2);
        assert!(put.arguments.iter().all(|a| a.required && a.type_name == "String!"));
        assert!(schema.root_type(OperationType::Subscription).is_some());
    }

    #[test]
    fn valid_documents_produce_no_errors() {
        assert!(errors_for("{ getEvent }").is_empty());
        assert!(errors_for(r#"subscription { chat(chatId: "room1") }"#).is_empty());
        assert!(errors_for(
            r#"mutation { putEvent(message: "hi", chatId: "room1") { FailedEntries } }"#
        )
        .is_empty());
        assert!(errors_for("subscription($c: String!) { chat(chatId: $c) }").is_empty());
        assert!(errors_for(r#"subscription($c: String = "lobby") { chat(chatId: $c) }"#).is_empty());
    }

    #[test]
    fn unknown_root_field_is_reported_with_location() {
        let errors = errors_for("query {\n  nope\n}");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Cannot query field \"nope\" on type \"Query\".");
        assert_eq!(errors[0].locations[0].line, 2);
        assert_eq!(errors[0].code(), ErrorCode::ValidationFailed);
    }

    #[test]
    fn missing_required_argument_is_reported() {
        let errors = errors_for(r#"mutation { putEvent(message: "hi") { FailedEntries } }"#);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("argument \"chatId\" of type \"String!\""));
    }

    #[test]
    fn unknown_argument_is_reported() {
        let errors = errors_for(r#"subscription { chat(chatId: "a", room: "b") }"#);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "Unknown argument \"room\" on field \"Subscription.chat\"."
        );
    }

    #[test]
    fn subscription_with_two_root_fields_is_rejected() {
        let errors = errors_for(r#"subscription S { a: chat(chatId: "a") b: chat(chatId: "b") }"#);
        assert!(errors
            .iter()
            .any(|e| e.message == "Subscription \"S\" must select only one top level field."));
    }

    #[test]
    fn leading_fragment_is_rejected() {
        let errors = errors_for("fragment F on Query { getEvent } { getEvent }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("found fragment \"F\""));
    }

    #[test]
    fn missing_root_type_is_reported() {
        let schema = OperationSchema::from_sdl("type Query { ping: String }").unwrap();
        let errors = schema.validate(&parse_document(r#"subscription { chat(chatId: "a") }"#).unwrap());
        assert_eq!(
            errors[0].message,
            "Schema is not configured to execute subscription operation."
        );
    }

    #[test]
    fn schema_block_naming_unknown_type_fails_to_load() {
        let err = OperationSchema::from_sdl("schema { query: Missing } type Query { a: String }")
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingRootType(name) if name == "Missing"));
    }

    #[test]
    fn defaulted_non_null_argument_is_optional() {
        let schema = OperationSchema::from_sdl(
            r#"type Query { greet(name: String! = "you"): String }"#,
        )
        .unwrap();
        let errors = schema.validate(&parse_document("{ greet }").unwrap());
        assert!(errors.is_empty());
    }

    #[test]
    fn invalid_sdl_fails_to_load() {
        assert!(matches!(
            OperationSchema::from_sdl("type {"),
            Err(SchemaError::Parse(_))
        ));
    }

    #[test]
    fn literals_must_match_the_declared_scalar() {
        let errors = errors_for("subscription { chat(chatId: 5) }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "String cannot represent a non string value: 5");
        assert_eq!(errors[0].code(), ErrorCode::ValidationFailed);

        let errors = errors_for("mutation { putEvent(chatId: true, message: 1) { FailedEntries } }");
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "String cannot represent a non string value: true",
                "String cannot represent a non string value: 1",
            ]
        );

        let errors = errors_for("subscription { chat(chatId: null) }");
        assert_eq!(errors[0].message, "Expected value of type \"String!\", found null.");
    }

    #[test]
    fn list_and_numeric_coercions_follow_input_rules() {
        let schema = OperationSchema::from_sdl(
            "type Query { sum(values: [Float!]!): Float tag(id: ID): String }",
        )
        .unwrap();
        let check = |text: &str| schema.validate(&parse_document(text).unwrap());

        assert!(check("{ sum(values: [1, 2.5]) }").is_empty());
        assert!(check("{ sum(values: 3) }").is_empty());
        assert!(check("{ tag(id: 7) tag2: tag(id: \"x\") }").is_empty());
        assert_eq!(
            check("{ sum(values: [1, \"two\"]) }")[0].message,
            "Float cannot represent non numeric value: \"two\""
        );
    }

    #[test]
    fn undefined_variables_are_reported() {
        let errors = errors_for("subscription { chat(chatId: $undefined) }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Variable \"$undefined\" is not defined.");

        let errors = errors_for("subscription Watch { chat(chatId: $room) }");
        assert_eq!(
            errors[0].message,
            "Variable \"$room\" is not defined by operation \"Watch\"."
        );
    }

    #[test]
    fn unused_variables_are_reported() {
        let errors = errors_for("query($c: String!) { getEvent }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Variable \"$c\" is never used.");
    }

    #[test]
    fn variable_types_must_fit_their_position() {
        let errors = errors_for("subscription($c: Int!) { chat(chatId: $c) }");
        assert_eq!(
            errors[0].message,
            "Variable \"$c\" of type \"Int!\" used in position expecting type \"String!\"."
        );

        let errors = errors_for("subscription($c: String) { chat(chatId: $c) }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("of type \"String\""));
    }
}

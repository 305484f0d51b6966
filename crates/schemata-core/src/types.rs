//! Core types and value objects for actions and their outcomes.
//!
//! Action definitions are immutable once loaded; requests, responses and
//! callers live for a single invocation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Response type used for user-facing notifications.
pub const CLIENT_NOTIFY: &str = "client.notify";

// =============================================================================
// Enums
// =============================================================================

/// Operation kind of one outcome.
///
/// The set is closed; any other method string is kept verbatim as
/// `Custom` and dispatched to the performer registered under the outcome's
/// type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    Post,
    Get,
    GetById,
    Patch,
    Delete,
    Execute,
    ActionResponse,
    Custom(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Post => "POST",
            Method::Get => "GET",
            Method::GetById => "GET_BY_ID",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Execute => "EXECUTE",
            Method::ActionResponse => "ACTIONRESPONSE",
            Method::Custom(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "POST" => Method::Post,
            "GET" => Method::Get,
            "GET_BY_ID" => Method::GetById,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "EXECUTE" => Method::Execute,
            "ACTIONRESPONSE" => Method::ActionResponse,
            other => Method::Custom(other.to_string()),
        }
    }
}

impl From<String> for Method {
    fn from(s: String) -> Self {
        Method::from(s.as_str())
    }
}

impl From<Method> for String {
    fn from(m: Method) -> Self {
        m.as_str().to_string()
    }
}

// =============================================================================
// Action definitions
// =============================================================================

/// One pipeline step of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Target entity type, performer name, or synthetic response type.
    #[serde(rename = "type")]
    pub entity_type: String,
    pub method: Method,
    /// Template tree resolved against the execution context.
    #[serde(default = "empty_object")]
    pub attributes: Value,
    /// Expression that must evaluate truthy for the step to run.
    #[serde(default)]
    pub condition: String,
    /// Name under which the step's result is published.
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub skip_in_response: bool,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Outcome {
    pub fn new(entity_type: impl Into<String>, method: Method, attributes: Value) -> Self {
        Self {
            entity_type: entity_type.into(),
            method,
            attributes,
            condition: String::new(),
            reference: String::new(),
            skip_in_response: false,
            continue_on_error: false,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn skip_in_response(mut self) -> Self {
        self.skip_in_response = true;
        self
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// An input field declared by an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InField {
    pub name: String,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub is_nullable: bool,
}

impl InField {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: None,
            is_nullable: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: None,
            is_nullable: true,
        }
    }
}

/// A field paired with comma-separated rule tags (validation or
/// conformation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub tags: String,
}

impl FieldRule {
    pub fn new(field: impl Into<String>, tags: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            tags: tags.into(),
        }
    }
}

/// A named server-side operation composed of ordered outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub on_type: String,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub in_fields: Vec<InField>,
    #[serde(default)]
    pub validations: Vec<FieldRule>,
    #[serde(default)]
    pub conformations: Vec<FieldRule>,
    #[serde(default)]
    pub out_fields: Vec<Outcome>,
    #[serde(default)]
    pub instance_optional: bool,
    #[serde(default)]
    pub request_subject_relations: Vec<String>,
}

impl Action {
    pub fn new(on_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            on_type: on_type.into(),
            name: name.into(),
            label: String::new(),
            in_fields: Vec::new(),
            validations: Vec::new(),
            conformations: Vec::new(),
            out_fields: Vec::new(),
            instance_optional: false,
            request_subject_relations: Vec::new(),
        }
    }

    /// Allow invoking the action without a subject instance.
    pub fn without_subject(mut self) -> Self {
        self.instance_optional = true;
        self
    }

    pub fn with_in_field(mut self, field: InField) -> Self {
        self.in_fields.push(field);
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.out_fields.push(outcome);
        self
    }

    /// `type:name` key used by permission rules and logs.
    pub fn key(&self) -> String {
        format!("{}:{}", self.on_type, self.name)
    }
}

// =============================================================================
// Invocation payloads
// =============================================================================

/// The invocation payload for one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub on_type: String,
    pub action: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Form data submitted alongside the attributes.
    #[serde(default)]
    pub form: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(on_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            on_type: on_type.into(),
            action: action.into(),
            attributes: Map::new(),
            form: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attribute name that carries the subject instance's reference id.
    pub fn subject_key(&self) -> String {
        format!("{}_id", self.on_type)
    }
}

/// One unit of output of an action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub response_type: String,
    pub attributes: Value,
}

impl ActionResponse {
    pub fn new(response_type: impl Into<String>, attributes: Value) -> Self {
        Self {
            response_type: response_type.into(),
            attributes,
        }
    }

    /// A `client.notify` response with the given kind, message and title.
    pub fn notify(kind: &str, message: impl Into<String>, title: &str) -> Self {
        let mut attrs = Map::new();
        attrs.insert("type".to_string(), Value::String(kind.to_string()));
        attrs.insert("message".to_string(), Value::String(message.into()));
        attrs.insert("title".to_string(), Value::String(title.to_string()));
        Self::new(CLIENT_NOTIFY, Value::Object(attrs))
    }
}

/// Identity of whoever invokes an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_reference_id: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(reference_id: impl Into<String>) -> Self {
        Self {
            user_reference_id: Some(reference_id.into()),
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn reference(&self) -> &str {
        self.user_reference_id.as_deref().unwrap_or("")
    }
}

// =============================================================================
// Tests
// =============================================================================

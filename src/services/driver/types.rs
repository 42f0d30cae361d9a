use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::error::DriverResult;

/// Scope of a server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    /// Schema metadata (types, rules)
    Schema,
    /// Data content (instances)
    Data,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Schema => "schema",
            SessionKind::Data => "data",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionType {
    #[default]
    Read,
    Write,
}

impl TransactionType {
    pub fn is_read(&self) -> bool {
        matches!(self, TransactionType::Read)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, TransactionType::Write)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Read => "read",
            TransactionType::Write => "write",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options handed to the driver when a transaction is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub infer: bool,
    pub explain: bool,
    /// Enforced by the server, not by this crate
    pub timeout: Option<Duration>,
}

/// Credentials for a cloud deployment
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub tls_enabled: bool,
    pub tls_root_ca: Option<PathBuf>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            tls_enabled: true,
            tls_root_ca: None,
        }
    }

    pub fn with_tls(mut self, enabled: bool, root_ca: Option<PathBuf>) -> Self {
        self.tls_enabled = enabled;
        self.tls_root_ca = root_ca;
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls_enabled", &self.tls_enabled)
            .field("tls_root_ca", &self.tls_root_ca)
            .finish()
    }
}

/// Public address as seen by the client, paired with the server's own address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTranslation {
    pub public: String,
    pub private: String,
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Core {
        address: String,
    },
    Cloud {
        addresses: Vec<String>,
        credential: Credential,
    },
    CloudTranslated {
        translations: Vec<AddressTranslation>,
        credential: Credential,
    },
}

impl ConnectTarget {
    pub fn core(address: impl Into<String>) -> Self {
        ConnectTarget::Core {
            address: address.into(),
        }
    }

    pub fn cloud(addresses: Vec<String>, credential: Credential) -> Self {
        ConnectTarget::Cloud {
            addresses,
            credential,
        }
    }

    pub fn is_cloud(&self) -> bool {
        !matches!(self, ConnectTarget::Core { .. })
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            ConnectTarget::Core { .. } => None,
            ConnectTarget::Cloud { credential, .. }
            | ConnectTarget::CloudTranslated { credential, .. } => Some(credential),
        }
    }

    /// Same addresses (and translations) with the password replaced.
    /// Core targets carry no credential and return `None`.
    pub fn with_password(&self, password: &str) -> Option<ConnectTarget> {
        let mut target = self.clone();
        match &mut target {
            ConnectTarget::Core { .. } => return None,
            ConnectTarget::Cloud { credential, .. }
            | ConnectTarget::CloudTranslated { credential, .. } => {
                credential.password = password.to_string();
            }
        }
        Some(target)
    }

    /// Short label for logs and notifications, e.g. `admin@10.0.0.1:1729`
    pub fn display_name(&self) -> String {
        match self {
            ConnectTarget::Core { address } => address.clone(),
            ConnectTarget::Cloud {
                addresses,
                credential,
            } => format!("{}@{}", credential.username, addresses.join(",")),
            ConnectTarget::CloudTranslated {
                translations,
                credential,
            } => {
                let public: Vec<&str> = translations.iter().map(|t| t.public.as_str()).collect();
                format!("{}@{}", credential.username, public.join(","))
            }
        }
    }
}

/// A single concept bound to a query variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Concept {
    Type {
        label: String,
    },
    Entity {
        iid: String,
        type_label: String,
    },
    Relation {
        iid: String,
        type_label: String,
    },
    Attribute {
        iid: String,
        type_label: String,
        value: serde_json::Value,
    },
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concept::Type { label } => write!(f, "type {}", label),
            Concept::Entity { iid, type_label } | Concept::Relation { iid, type_label } => {
                write!(f, "iid {} isa {}", iid, type_label)
            }
            Concept::Attribute {
                type_label, value, ..
            } => write!(f, "{} isa {}", value, type_label),
        }
    }
}

/// One answer row: variables bound to concepts, in answer order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConceptRow {
    pub columns: Vec<(String, Concept)>,
}

impl ConceptRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, variable: impl Into<String>, concept: Concept) -> Self {
        self.columns.push((variable.into(), concept));
        self
    }

    pub fn get(&self, variable: &str) -> Option<&Concept> {
        self.columns
            .iter()
            .find(|(name, _)| name == variable)
            .map(|(_, concept)| concept)
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl fmt::Display for ConceptRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (name, concept) in &self.columns {
            write!(f, " ${}: {};", name, concept)?;
        }
        f.write_str(" }")
    }
}

/// Semi-structured answer produced by fetch queries
pub type Document = serde_json::Value;

pub type RowIter = Box<dyn Iterator<Item = DriverResult<ConceptRow>> + Send>;
pub type DocumentIter = Box<dyn Iterator<Item = DriverResult<Document>> + Send>;

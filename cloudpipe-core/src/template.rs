// cloudpipe-core/src/template.rs
// ============================================================================
// Module: Pipe Templates
// Description: Adapter/proto enumerations and template schema resolution.
// Purpose: Map declared binding layers onto the schema pair for a pipe.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A blueprint declares its binding in layers: authentication adapters and a
//! wire proto. Each layer maps to a pair of payload shapes, one per side of
//! the pipe. A [`PipeTemplate`] resolves that pair eagerly into the schemas
//! for the local (`this`) and remote (`other`) end, swapping the pair when
//! the local side is the provider.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::schema::generate_schema;

// ============================================================================
// SECTION: Payload Shapes
// ============================================================================

/// One field of a payload shape, optionally pattern-constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadField {
    /// Field name as it appears in end data.
    pub name: &'static str,
    /// Optional regex pattern constraining the string value.
    pub pattern: Option<&'static str>,
}

impl PayloadField {
    /// Unconstrained string field.
    #[must_use]
    pub const fn plain(name: &'static str) -> Self {
        Self {
            name,
            pattern: None,
        }
    }

    /// String field constrained by a regex pattern.
    #[must_use]
    pub const fn patterned(name: &'static str, pattern: &'static str) -> Self {
        Self {
            name,
            pattern: Some(pattern),
        }
    }
}

/// A reflectable payload shape: the fields one side of a layer advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadShape {
    /// Stable identifier slug used as the schema `$id` suffix.
    pub id: &'static str,
    /// Declared fields, all required strings.
    pub fields: &'static [PayloadField],
}

const OIDC_CONSUMER_SHAPE: PayloadShape = PayloadShape {
    id: "auth-oidc-consumer",
    fields: &[
        PayloadField::plain("ISS"),
        PayloadField::plain("SUB"),
        PayloadField::plain("AUD"),
    ],
};

const MTLS_CONSUMER_SHAPE: PayloadShape = PayloadShape {
    id: "auth-mtls-consumer",
    fields: &[
        PayloadField::plain("CLIENT_CERT"),
        PayloadField::plain("CLIENT_KEY"),
        PayloadField::plain("CA_CERT"),
    ],
};

const BASIC_CONSUMER_SHAPE: PayloadShape = PayloadShape {
    id: "auth-basic-consumer",
    fields: &[PayloadField::plain("USER"), PayloadField::plain("PASS")],
};

const SECRET_CONSUMER_SHAPE: PayloadShape = PayloadShape {
    id: "auth-secret-consumer",
    fields: &[PayloadField::plain("SECRET")],
};

const SERVER_PROVIDER_SHAPE: PayloadShape = PayloadShape {
    id: "auth-server-provider",
    fields: &[PayloadField::plain("USER"), PayloadField::plain("PASS")],
};

const HTTPS_PROVIDER_SHAPE: PayloadShape = PayloadShape {
    id: "proto-https-provider",
    fields: &[PayloadField::patterned("URI", "^https://")],
};

const REDISS_PROVIDER_SHAPE: PayloadShape = PayloadShape {
    id: "proto-rediss-provider",
    fields: &[PayloadField::patterned("URI", "^rediss://")],
};

const POSTGRESQLS_PROVIDER_SHAPE: PayloadShape = PayloadShape {
    id: "proto-postgresqls-provider",
    fields: &[PayloadField::patterned("URI", "^postgresqls://")],
};

// ============================================================================
// SECTION: Adapter and Proto Types
// ============================================================================

/// Authentication layer carried by a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterType {
    /// OIDC identity claims presented by the consumer.
    #[serde(rename = "auth:oidc")]
    Oidc,
    /// Mutual TLS client credentials presented by the consumer.
    #[serde(rename = "auth:mtls")]
    Mtls,
    /// Basic credentials presented by the consumer.
    #[serde(rename = "auth:basic")]
    Basic,
    /// Shared secret presented by the consumer.
    #[serde(rename = "auth:secret")]
    Secret,
    /// Basic credentials issued by the provider.
    #[serde(rename = "auth:server")]
    Server,
}

impl AdapterType {
    /// String tag used on the wire and in URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oidc => "auth:oidc",
            Self::Mtls => "auth:mtls",
            Self::Basic => "auth:basic",
            Self::Secret => "auth:secret",
            Self::Server => "auth:server",
        }
    }

    /// Parses a wire tag into an adapter type.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "auth:oidc" => Some(Self::Oidc),
            "auth:mtls" => Some(Self::Mtls),
            "auth:basic" => Some(Self::Basic),
            "auth:secret" => Some(Self::Secret),
            "auth:server" => Some(Self::Server),
            _ => None,
        }
    }

    /// Returns the `(consumer, provider)` payload shape pair for this layer.
    #[must_use]
    pub const fn pipe_shapes(self) -> (Option<PayloadShape>, Option<PayloadShape>) {
        match self {
            Self::Oidc => (Some(OIDC_CONSUMER_SHAPE), None),
            Self::Mtls => (Some(MTLS_CONSUMER_SHAPE), None),
            Self::Basic => (Some(BASIC_CONSUMER_SHAPE), None),
            Self::Secret => (Some(SECRET_CONSUMER_SHAPE), None),
            Self::Server => (None, Some(SERVER_PROVIDER_SHAPE)),
        }
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire protocol carried by a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtoType {
    /// HTTPS endpoint.
    #[serde(rename = "https")]
    Https,
    /// TLS-protected Redis endpoint.
    #[serde(rename = "rediss")]
    Rediss,
    /// TLS-protected PostgreSQL endpoint.
    #[serde(rename = "postgresqls")]
    Postgresqls,
}

impl ProtoType {
    /// String tag used on the wire and in URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Rediss => "rediss",
            Self::Postgresqls => "postgresqls",
        }
    }

    /// Parses a wire tag into a proto type.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "https" => Some(Self::Https),
            "rediss" => Some(Self::Rediss),
            "postgresqls" => Some(Self::Postgresqls),
            _ => None,
        }
    }

    /// Returns the `(consumer, provider)` payload shape pair for this layer.
    #[must_use]
    pub const fn pipe_shapes(self) -> (Option<PayloadShape>, Option<PayloadShape>) {
        match self {
            Self::Https => (None, Some(HTTPS_PROVIDER_SHAPE)),
            Self::Rediss => (None, Some(REDISS_PROVIDER_SHAPE)),
            Self::Postgresqls => (None, Some(POSTGRESQLS_PROVIDER_SHAPE)),
        }
    }
}

impl fmt::Display for ProtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Template identifier: an adapter tag or a proto tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateId {
    /// Authentication layer tag.
    Adapter(AdapterType),
    /// Wire protocol tag.
    Proto(ProtoType),
}

impl TemplateId {
    /// String tag used on the wire and in URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adapter(adapter) => adapter.as_str(),
            Self::Proto(proto) => proto.as_str(),
        }
    }

    /// Returns the `(consumer, provider)` payload shape pair for this layer.
    #[must_use]
    pub const fn pipe_shapes(self) -> (Option<PayloadShape>, Option<PayloadShape>) {
        match self {
            Self::Adapter(adapter) => adapter.pipe_shapes(),
            Self::Proto(proto) => proto.pipe_shapes(),
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Pipe Template
// ============================================================================

/// One resolved layer of a blueprint: the schema halves for both pipe ends
/// plus the default payload this side advertises.
#[derive(Debug, Clone, Serialize)]
pub struct PipeTemplate {
    /// Layer tag.
    pub id: TemplateId,
    /// Schema half governing the local end.
    #[serde(rename = "this", skip_serializing_if = "Option::is_none")]
    pub this_schema: Option<Value>,
    /// Schema half governing the remote end.
    #[serde(rename = "other", skip_serializing_if = "Option::is_none")]
    pub other_schema: Option<Value>,
    /// Default payload merged into the local end on pipe creation.
    #[serde(skip)]
    pub data: Option<Value>,
}

impl PipeTemplate {
    /// Resolves a template for one layer of a blueprint.
    ///
    /// The shape pair is `(consumer, provider)`; when `provider` is true the
    /// pair is swapped so that `this` is always the local side. The resolved
    /// template is immutable.
    #[must_use]
    pub fn new(provider: bool, id: TemplateId, data: Option<Value>) -> Self {
        let (consumer_shape, provider_shape) = id.pipe_shapes();
        let (this_shape, other_shape) = if provider {
            (provider_shape, consumer_shape)
        } else {
            (consumer_shape, provider_shape)
        };
        Self {
            id,
            this_schema: generate_schema(&[this_shape]),
            other_schema: generate_schema(&[other_shape]),
            data,
        }
    }
}

// ============================================================================
// SECTION: Default Payloads
// ============================================================================

/// OIDC identity claims advertised by a consumer end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcAuthData {
    /// Expected token issuer.
    #[serde(rename = "ISS")]
    pub issuer: String,
    /// Expected token subject.
    #[serde(rename = "SUB")]
    pub subject: String,
    /// Expected token audience.
    #[serde(rename = "AUD")]
    pub audience: String,
}

/// Basic credentials payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthData {
    /// Username.
    #[serde(rename = "USER")]
    pub user: String,
    /// Password.
    #[serde(rename = "PASS")]
    pub pass: String,
}

/// Mutual TLS credentials payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtlsAuthData {
    /// PEM-encoded client certificate.
    #[serde(rename = "CLIENT_CERT")]
    pub client_cert: String,
    /// PEM-encoded client key.
    #[serde(rename = "CLIENT_KEY")]
    pub client_key: String,
    /// PEM-encoded certificate authority bundle.
    #[serde(rename = "CA_CERT")]
    pub ca_cert: String,
}

/// Shared secret payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretAuthData {
    /// Opaque shared secret.
    #[serde(rename = "SECRET")]
    pub secret: String,
}

/// Bare URI payload used for proto defaults and resource default data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UriData {
    /// Endpoint URI.
    #[serde(rename = "URI")]
    pub uri: String,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

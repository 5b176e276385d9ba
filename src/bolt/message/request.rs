//! Bolt protocol request messages.
//!
//! Request messages are sent from the client to the server. Each message packs
//! itself straight into a [`PackStreamEncoder`], so the framing layer can write
//! it into chunks without building an intermediate value tree.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::tag;
use crate::bolt::packstream::{PackOutput, PackStreamEncoder, PackStreamError, PackStreamValue};

/// Access mode for transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Read-write access (default)
    #[default]
    Write,
    /// Read-only access
    Read,
}

impl AccessMode {
    /// Parse from a string, anything but read means write.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "r" | "read" => AccessMode::Read,
            _ => AccessMode::Write,
        }
    }

    /// Convert to string for metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }
}

/// Authentication token sent with LOGON.
///
/// Parameters are kept in an ordered map so tokens can be compared and hashed
/// structurally.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken {
    /// Authentication scheme (e.g., "basic", "bearer")
    pub scheme: String,
    /// Principal (username)
    pub principal: Option<String>,
    /// Credentials (password or token)
    pub credentials: Option<String>,
    /// Realm
    pub realm: Option<String>,
    /// Additional parameters
    pub parameters: BTreeMap<String, String>,
}

impl AuthToken {
    /// Create a basic auth token.
    pub fn basic(principal: &str, credentials: &str) -> Self {
        Self {
            scheme: "basic".to_string(),
            principal: Some(principal.to_string()),
            credentials: Some(credentials.to_string()),
            realm: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Create a bearer token, e.g. an SSO access token.
    pub fn bearer(token: &str) -> Self {
        Self {
            scheme: "bearer".to_string(),
            principal: None,
            credentials: Some(token.to_string()),
            realm: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Create an anonymous auth token (no auth).
    pub fn none() -> Self {
        Self {
            scheme: "none".to_string(),
            principal: None,
            credentials: None,
            realm: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Set the realm.
    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = Some(realm.to_string());
        self
    }

    /// Add a scheme specific parameter.
    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    /// Convert to PackStream map.
    pub fn to_map(&self) -> HashMap<String, PackStreamValue> {
        let mut map = HashMap::new();
        map.insert("scheme".to_string(), PackStreamValue::String(self.scheme.clone()));
        if let Some(ref p) = self.principal {
            map.insert("principal".to_string(), PackStreamValue::String(p.clone()));
        }
        if let Some(ref c) = self.credentials {
            map.insert("credentials".to_string(), PackStreamValue::String(c.clone()));
        }
        if let Some(ref r) = self.realm {
            map.insert("realm".to_string(), PackStreamValue::String(r.clone()));
        }
        for (k, v) in &self.parameters {
            map.insert(k.clone(), PackStreamValue::String(v.clone()));
        }
        map
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("scheme", &self.scheme)
            .field("principal", &self.principal)
            .field("credentials", &self.credentials.as_ref().map(|_| "******"))
            .field("realm", &self.realm)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Identification of the driver sent in HELLO from Bolt 5.3 on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoltAgent {
    pub product: String,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub language_details: Option<String>,
}

impl BoltAgent {
    fn to_map(&self) -> HashMap<String, PackStreamValue> {
        let mut map = HashMap::new();
        map.insert("product".to_string(), PackStreamValue::from(self.product.as_str()));
        let optional = [
            ("platform", &self.platform),
            ("language", &self.language),
            ("language_details", &self.language_details),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                map.insert(key.to_string(), PackStreamValue::from(v.as_str()));
            }
        }
        map
    }
}

/// All Bolt request messages.
#[derive(Debug, Clone)]
pub enum BoltRequest {
    /// HELLO - Initialize connection
    Hello(HelloMessage),
    /// LOGON - Authenticate (Bolt 5.1+)
    Logon(LogonMessage),
    /// LOGOFF - Deauthenticate (Bolt 5.1+)
    Logoff,
    /// GOODBYE - Close connection gracefully
    Goodbye,
    /// RESET - Reset connection state
    Reset,
    /// RUN - Execute a query
    Run(RunMessage),
    /// PULL - Pull results
    Pull(PullMessage),
    /// DISCARD - Discard results
    Discard(DiscardMessage),
    /// BEGIN - Start transaction
    Begin(BeginMessage),
    /// COMMIT - Commit transaction
    Commit,
    /// ROLLBACK - Rollback transaction
    Rollback,
}

impl BoltRequest {
    /// Get the message signature.
    pub fn signature(&self) -> u8 {
        match self {
            BoltRequest::Hello(_) => tag::HELLO,
            BoltRequest::Logon(_) => tag::LOGON,
            BoltRequest::Logoff => tag::LOGOFF,
            BoltRequest::Goodbye => tag::GOODBYE,
            BoltRequest::Reset => tag::RESET,
            BoltRequest::Run(_) => tag::RUN,
            BoltRequest::Pull(_) => tag::PULL,
            BoltRequest::Discard(_) => tag::DISCARD,
            BoltRequest::Begin(_) => tag::BEGIN,
            BoltRequest::Commit => tag::COMMIT,
            BoltRequest::Rollback => tag::ROLLBACK,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltRequest::Hello(_) => "HELLO",
            BoltRequest::Logon(_) => "LOGON",
            BoltRequest::Logoff => "LOGOFF",
            BoltRequest::Goodbye => "GOODBYE",
            BoltRequest::Reset => "RESET",
            BoltRequest::Run(_) => "RUN",
            BoltRequest::Pull(_) => "PULL",
            BoltRequest::Discard(_) => "DISCARD",
            BoltRequest::Begin(_) => "BEGIN",
            BoltRequest::Commit => "COMMIT",
            BoltRequest::Rollback => "ROLLBACK",
        }
    }

    /// Pack the message as a struct: header, then fields in wire order.
    pub fn pack<O: PackOutput>(&self, enc: &mut PackStreamEncoder<'_, O>) -> Result<(), PackStreamError> {
        let signature = self.signature();
        match self {
            BoltRequest::Hello(msg) => {
                enc.encode_struct_header(1, signature)?;
                enc.encode_map(&msg.extra())
            }
            BoltRequest::Logon(msg) => {
                enc.encode_struct_header(1, signature)?;
                enc.encode_map(&msg.auth.to_map())
            }
            BoltRequest::Run(msg) => {
                enc.encode_struct_header(3, signature)?;
                enc.encode_string(&msg.query)?;
                enc.encode_map(&msg.parameters)?;
                enc.encode_map(&msg.metadata)
            }
            BoltRequest::Pull(msg) => {
                enc.encode_struct_header(1, signature)?;
                pack_stream_limits(enc, msg.n, msg.qid)
            }
            BoltRequest::Discard(msg) => {
                enc.encode_struct_header(1, signature)?;
                pack_stream_limits(enc, msg.n, msg.qid)
            }
            BoltRequest::Begin(msg) => {
                enc.encode_struct_header(1, signature)?;
                enc.encode_map(&msg.metadata)
            }
            BoltRequest::Logoff
            | BoltRequest::Goodbye
            | BoltRequest::Reset
            | BoltRequest::Commit
            | BoltRequest::Rollback => enc.encode_struct_header(0, signature),
        }
    }
}

/// `{n, qid}` map shared by PULL and DISCARD; `qid` is left out for the last statement.
fn pack_stream_limits<O: PackOutput>(
    enc: &mut PackStreamEncoder<'_, O>,
    n: i64,
    qid: i64,
) -> Result<(), PackStreamError> {
    let with_qid = qid != NO_QID;
    enc.encode_map_header(if with_qid { 2 } else { 1 })?;
    enc.encode_string("n")?;
    enc.encode_int(n);
    if with_qid {
        enc.encode_string("qid")?;
        enc.encode_int(qid);
    }
    Ok(())
}

/// Query id meaning "the last statement run".
pub const NO_QID: i64 = -1;

/// Record limit meaning "everything".
pub const UNLIMITED: i64 = -1;

/// HELLO message - Initialize connection.
#[derive(Debug, Clone)]
pub struct HelloMessage {
    /// User agent string
    pub user_agent: String,
    /// Bolt agent, only sent from Bolt 5.3 on
    pub bolt_agent: Option<BoltAgent>,
    /// Routing context
    pub routing: Option<HashMap<String, PackStreamValue>>,
}

impl HelloMessage {
    /// Create a new HELLO message.
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            bolt_agent: None,
            routing: None,
        }
    }

    /// Set the bolt agent.
    pub fn with_bolt_agent(mut self, agent: BoltAgent) -> Self {
        self.bolt_agent = Some(agent);
        self
    }

    /// Set routing context.
    pub fn with_routing(mut self, routing: HashMap<String, PackStreamValue>) -> Self {
        self.routing = Some(routing);
        self
    }

    fn extra(&self) -> HashMap<String, PackStreamValue> {
        let mut extra = HashMap::new();
        extra.insert("user_agent".to_string(), PackStreamValue::from(self.user_agent.as_str()));
        if let Some(ref agent) = self.bolt_agent {
            extra.insert("bolt_agent".to_string(), PackStreamValue::Map(agent.to_map()));
        }
        if let Some(ref routing) = self.routing {
            extra.insert("routing".to_string(), PackStreamValue::Map(routing.clone()));
        }
        extra
    }
}

/// LOGON message - Authenticate the connection.
#[derive(Debug, Clone)]
pub struct LogonMessage {
    /// Credentials
    pub auth: AuthToken,
}

impl LogonMessage {
    pub fn new(auth: AuthToken) -> Self {
        Self { auth }
    }
}

/// RUN message - Execute a query.
#[derive(Debug, Clone)]
pub struct RunMessage {
    /// Cypher query string
    pub query: String,
    /// Query parameters
    pub parameters: HashMap<String, PackStreamValue>,
    /// Transaction metadata (empty inside an explicit transaction)
    pub metadata: HashMap<String, PackStreamValue>,
}

impl RunMessage {
    /// Create a new RUN message.
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            parameters: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set query parameters.
    pub fn with_parameters(mut self, params: HashMap<String, PackStreamValue>) -> Self {
        self.parameters = params;
        self
    }

    /// Set transaction metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, PackStreamValue>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// PULL message - Pull query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullMessage {
    /// Number of records to pull (-1 for all)
    pub n: i64,
    /// Query ID for multi-query results (-1 for the last one)
    pub qid: i64,
}

impl PullMessage {
    /// Create a PULL ALL message.
    pub fn all() -> Self {
        Self { n: UNLIMITED, qid: NO_QID }
    }

    /// Create a PULL with specific count.
    pub fn with_n(n: i64) -> Self {
        Self { n, qid: NO_QID }
    }

    /// Set query ID.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.qid = qid;
        self
    }
}

/// DISCARD message - Discard query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardMessage {
    /// Number of records to discard (-1 for all)
    pub n: i64,
    /// Query ID for multi-query results (-1 for the last one)
    pub qid: i64,
}

impl DiscardMessage {
    /// Create a DISCARD ALL message.
    pub fn all() -> Self {
        Self { n: UNLIMITED, qid: NO_QID }
    }

    /// Create a DISCARD with specific count.
    pub fn with_n(n: i64) -> Self {
        Self { n, qid: NO_QID }
    }

    /// Set query ID.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.qid = qid;
        self
    }
}

/// BEGIN message - Start a transaction.
#[derive(Debug, Clone, Default)]
pub struct BeginMessage {
    /// Transaction metadata, see [`super::TransactionMetadataBuilder`]
    pub metadata: HashMap<String, PackStreamValue>,
}

impl BeginMessage {
    pub fn new(metadata: HashMap<String, PackStreamValue>) -> Self {
        Self { metadata }
    }
}

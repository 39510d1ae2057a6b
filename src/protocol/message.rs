use std::{convert::Infallible, fmt, str::FromStr};

use super::RequestId;

/// Fully qualified collection name, `database.collection` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// The resource a reply belongs to. Carried with every outbound message and handed back
/// to the codec when the matching reply is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyContext {
    Admin,
    Database(String),
    Collection(Namespace),
}

impl FromStr for ReplyContext {
    type Err = Infallible;

    /// `admin` → [`ReplyContext::Admin`], `db` → [`ReplyContext::Database`],
    /// `db.collection` → [`ReplyContext::Collection`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('.') {
            Some((database, collection)) => {
                ReplyContext::Collection(Namespace::new(database, collection))
            }
            None if s == "admin" => ReplyContext::Admin,
            None => ReplyContext::Database(s.to_string()),
        })
    }
}

/// A logical request on its way to the server.
///
/// The body stays in its logical form; the codec encodes it at send time. Once sent with
/// a handler the message is owned by the pending registry until its reply arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage<M> {
    request_id: RequestId,
    context: ReplyContext,
    body: M,
}

impl<M> OutboundMessage<M> {
    pub fn new(request_id: RequestId, context: ReplyContext, body: M) -> Self {
        Self {
            request_id,
            context,
            body,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn context(&self) -> &ReplyContext {
        &self.context
    }

    pub fn body(&self) -> &M {
        &self.body
    }

    pub fn into_body(self) -> M {
        self.body
    }
}

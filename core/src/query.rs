use core::fmt;

use crate::{Action, ExecContext, Filter};

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub attribute: String,
    pub ascending: bool,
}

impl Sort {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: true,
        }
    }

    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: false,
        }
    }
}

/// Description of one CRUD request against a resource.
///
/// Built once by the request decoder and handed to the engine by value.
#[derive(Debug, Clone)]
pub struct RestQuery {
    pub resource: String,
    pub action: Action,
    /// Primary key; empty unless the action targets a single entity
    pub key: String,
    pub offset: u64,
    /// `None` takes the engine's default page size
    pub limit: Option<u64>,
    pub fields: Vec<String>,
    pub relations: Vec<String>,
    pub sort: Vec<Sort>,
    pub filter: Option<Filter>,
    /// Schema/namespace override
    pub namespace: String,
    pub content_type: String,
    pub accept: String,
    pub body: Vec<u8>,
    pub debug: bool,
    pub context: ExecContext,
}

impl RestQuery {
    pub fn new(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
            key: String::new(),
            offset: 0,
            limit: None,
            fields: Vec::new(),
            relations: Vec::new(),
            sort: Vec::new(),
            filter: None,
            namespace: String::new(),
            content_type: String::new(),
            accept: String::new(),
            body: Vec::new(),
            debug: false,
            context: ExecContext::default(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations = relations.into_iter().map(Into::into).collect();
        self
    }

    pub fn sort(mut self, sort: impl IntoIterator<Item = Sort>) -> Self {
        self.sort = sort.into_iter().collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = content_type.into();
        self.body = body.into();
        self
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn context(mut self, context: ExecContext) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Display for RestQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.resource)?;
        if !self.key.is_empty() {
            return write!(f, "[{}]", self.key);
        }
        if self.action != Action::Fetch {
            return Ok(());
        }
        write!(f, " offset={}", self.offset)?;
        if let Some(limit) = self.limit {
            write!(f, " limit={limit}")?;
        }
        if !self.fields.is_empty() {
            write!(f, " fields={}", self.fields.join(","))?;
        }
        if !self.relations.is_empty() {
            write!(f, " relations={}", self.relations.join(","))?;
        }
        if !self.sort.is_empty() {
            f.write_str(" sort=")?;
            for (i, s) in self.sort.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                if !s.ascending {
                    f.write_str("-")?;
                }
                f.write_str(&s.attribute)?;
            }
        }
        if let Some(filter) = &self.filter {
            write!(f, " filter={filter}")?;
        }
        Ok(())
    }
}

//! Declarative description of reloadable objects.
//!
//! Hosts describe the configuration-bound fields of every reloadable object up
//! front instead of the engine reflecting over live objects.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Bound to exactly one key
    Scalar,
    /// List, map or array: every key below it belongs to the field
    Collection,
    /// Nested object, scanned with the field name appended to the path
    Nested(FieldSet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub kind: FieldKind,
}

/// Ordered field declarations with a builder API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<FieldDecl>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(
        self,
        name: impl Into<String>,
    ) -> Self {
        self.field(name, FieldKind::Scalar)
    }

    pub fn collection(
        self,
        name: impl Into<String>,
    ) -> Self {
        self.field(name, FieldKind::Collection)
    }

    pub fn nested(
        self,
        name: impl Into<String>,
        build: impl FnOnce(FieldSet) -> FieldSet,
    ) -> Self {
        self.field(name, FieldKind::Nested(build(FieldSet::new())))
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDecl> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The bound fields of one reloadable object, rooted at a key prefix.
///
/// ```ignore
/// let schema = ReloadableSchema::new("app")
///     .scalar("name")
///     .collection("servers")
///     .nested("dataSource", |f| f.scalar("maxPool"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadableSchema {
    pub prefix: String,
    pub fields: FieldSet,
}

impl ReloadableSchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            fields: FieldSet::new(),
        }
    }

    pub fn scalar(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.fields = self.fields.scalar(name);
        self
    }

    pub fn collection(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.fields = self.fields.collection(name);
        self
    }

    pub fn nested(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(FieldSet) -> FieldSet,
    ) -> Self {
        self.fields = self.fields.nested(name, build);
        self
    }
}

/// Both external spellings of a field name: camelCase and hyphenated.
pub(crate) fn spellings(name: &str) -> Vec<String> {
    let camel = to_camel_case(name);
    let kebab = to_kebab_case(&camel);
    if camel == kebab {
        vec![camel]
    } else {
        vec![camel, kebab]
    }
}

pub(crate) fn join_path(
    prefix: &str,
    name: &str,
) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '-' || c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn to_kebab_case(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len() + 4);
    for (i, c) in camel.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

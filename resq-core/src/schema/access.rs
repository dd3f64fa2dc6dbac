use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

/// Operation an access rule applies to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Property is visible in a response
    See,
    /// Property may be present in a request body
    Submit,
    /// Property may be loaded from the persistence backend
    Load,
    /// Property may be stored on creation
    Persist,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::See,
        Operation::Submit,
        Operation::Load,
        Operation::Persist,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::See => "see",
            Operation::Submit => "submit",
            Operation::Load => "load",
            Operation::Persist => "persist",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub const EVERYONE: &str = "*";
pub const AUTHENTICATED: &str = "authenticated";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Everyone,
    Nobody,
    Authenticated,
    Roles(BTreeSet<String>),
}

impl Access {
    /// Build a rule from its declared form: a list of role names, where `*` means everyone
    /// and `authenticated` any identified principal. An empty list denies access.
    pub fn from_roles<S: AsRef<str>>(roles: &[S]) -> Self {
        if roles.is_empty() {
            return Access::Nobody;
        }
        if roles.iter().any(|r| r.as_ref() == EVERYONE) {
            return Access::Everyone;
        }
        if roles.iter().any(|r| r.as_ref() == AUTHENTICATED) {
            return Access::Authenticated;
        }
        Access::Roles(roles.iter().map(|r| r.as_ref().to_owned()).collect())
    }

    pub fn permits(&self, principal: &Principal) -> bool {
        match self {
            Access::Everyone => true,
            Access::Nobody => false,
            Access::Authenticated => principal.name.is_some(),
            Access::Roles(roles) => roles.iter().any(|r| principal.roles.contains(r)),
        }
    }
}

impl Default for Access {
    fn default() -> Self {
        Access::Everyone
    }
}

/// Access rule per operation; operations without a rule are open to everyone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessRules(BTreeMap<Operation, Access>);

impl AccessRules {
    pub fn new() -> Self {
        AccessRules(BTreeMap::new())
    }

    pub fn from_declaration(declared: &BTreeMap<Operation, Vec<String>>) -> Self {
        AccessRules(
            declared
                .iter()
                .map(|(op, roles)| (*op, Access::from_roles(roles)))
                .collect(),
        )
    }

    pub fn with(mut self, operation: Operation, access: Access) -> Self {
        self.0.insert(operation, access);
        self
    }

    pub fn rule(&self, operation: Operation) -> &Access {
        static OPEN: Access = Access::Everyone;
        self.0.get(&operation).unwrap_or(&OPEN)
    }

    /// Check the operation for a principal.
    /// A missing principal stands for trusted internal code and is always permitted.
    pub fn permits(&self, operation: Operation, principal: Option<&Principal>) -> bool {
        match principal {
            Some(p) => self.rule(operation).permits(p),
            None => true,
        }
    }

    /// True if the rule for the operation is unconditionally denied
    pub fn denies(&self, operation: Operation) -> bool {
        matches!(self.rule(operation), Access::Nobody)
    }
}

/// Identity on whose behalf a session reads or writes resources.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Principal {
    pub name: Option<String>,
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Principal::default()
    }
    pub fn new<S: Into<String>>(name: S) -> Self {
        Principal {
            name: Some(name.into()),
            roles: BTreeSet::new(),
        }
    }
    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self {
        self.roles.insert(role.into());
        self
    }
}

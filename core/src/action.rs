use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};

/// The operation a request performs against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Fetch,
    Create,
    Replace,
    PartialUpdate,
    Delete,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Fetch,
        Action::Create,
        Action::Replace,
        Action::PartialUpdate,
        Action::Delete,
    ];

    /// The permission bit for this action.
    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            Action::Fetch => 1,
            Action::Create => 1 << 1,
            Action::Replace => 1 << 2,
            Action::PartialUpdate => 1 << 3,
            Action::Delete => 1 << 4,
        }
    }

    /// HTTP status reported on success.
    #[inline]
    pub const fn success_status(self) -> u16 {
        match self {
            Action::Fetch | Action::Replace | Action::PartialUpdate => 200,
            Action::Create => 201,
            Action::Delete => 204,
        }
    }

    /// Whether the action reads a request body.
    #[inline]
    pub const fn has_body(self) -> bool {
        matches!(self, Action::Create | Action::Replace | Action::PartialUpdate)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Fetch => "Fetch",
            Action::Create => "Create",
            Action::Replace => "Replace",
            Action::PartialUpdate => "PartialUpdate",
            Action::Delete => "Delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of permitted actions, stored as independent bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActionSet(u8);

impl ActionSet {
    pub const NONE: ActionSet = ActionSet(0);
    pub const ALL: ActionSet = ActionSet(0b1_1111);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// `requested & allowed != 0`
    #[inline]
    pub const fn permits(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Action> {
        Action::ALL.into_iter().filter(move |a| self.permits(*a))
    }
}

impl From<Action> for ActionSet {
    #[inline]
    fn from(action: Action) -> Self {
        ActionSet(action.bit())
    }
}

impl<A: Into<ActionSet>> BitOr<A> for ActionSet {
    type Output = ActionSet;

    fn bitor(self, rhs: A) -> ActionSet {
        ActionSet(self.0 | rhs.into().0)
    }
}

impl<A: Into<ActionSet>> BitOrAssign<A> for ActionSet {
    fn bitor_assign(&mut self, rhs: A) {
        self.0 |= rhs.into().0;
    }
}

impl<A: Into<ActionSet>> BitOr<A> for Action {
    type Output = ActionSet;

    fn bitor(self, rhs: A) -> ActionSet {
        ActionSet(self.bit() | rhs.into().0)
    }
}

impl<A: Into<ActionSet>> BitAnd<A> for ActionSet {
    type Output = ActionSet;

    fn bitand(self, rhs: A) -> ActionSet {
        ActionSet(self.0 & rhs.into().0)
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        iter.into_iter().fold(ActionSet::NONE, |set, a| set | a)
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        if *self == ActionSet::ALL {
            return f.write_str("All");
        }
        for (i, action) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(action.as_str())?;
        }
        Ok(())
    }
}

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::models::CoreError;

/// Ways an episode can end.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum StopKind {
    Done,
    Fail,
    Ans,
    Timeout,
}

impl StopKind {
    pub const ALL: [StopKind; 4] = [
        StopKind::Done,
        StopKind::Fail,
        StopKind::Ans,
        StopKind::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Fail => "FAIL",
            Self::Ans => "ANS",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl FromStr for StopKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| CoreError::config(format!("unknown stop kind '{value}'")))
    }
}

impl Display for StopKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StopSignal {
    pub kind: StopKind,
    pub args: Vec<String>,
}

impl StopSignal {
    pub fn new(kind: StopKind, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: StopKind::Timeout,
            args: Vec::new(),
        }
    }

    /// Parses operator input of the form `KIND arg1 arg2`. Blank or unknown input
    /// falls back to `TIMEOUT`.
    pub fn parse_manual(text: &str) -> Self {
        let mut parts = text.split_whitespace();
        match parts.next().map(str::parse::<StopKind>) {
            Some(Ok(kind)) => Self::new(kind, parts),
            _ => Self::timeout(),
        }
    }
}

impl Display for StopSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind.as_str())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Tri-state result of one code action: `Effective` / `NoOp` / `Undecided`
/// correspond to true / false / unknown.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ActionOutcome {
    Effective,
    NoOp,
    Undecided,
}

impl From<Option<bool>> for ActionOutcome {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Effective,
            Some(false) => Self::NoOp,
            None => Self::Undecided,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionResult {
    Continue(ActionOutcome),
    Stop(StopSignal),
}

/// Built-in action vocabulary a proposer may emit instead of target code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Primitive {
    Done,
    Fail,
    Wait,
    Ans,
    Timeout,
}

impl Primitive {
    pub const ALL: [Primitive; 5] = [
        Primitive::Done,
        Primitive::Fail,
        Primitive::Wait,
        Primitive::Ans,
        Primitive::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Fail => "FAIL",
            Self::Wait => "WAIT",
            Self::Ans => "ANS",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|item| item.as_str() == value)
    }

    pub fn stop_kind(self) -> Option<StopKind> {
        match self {
            Self::Done => Some(StopKind::Done),
            Self::Fail => Some(StopKind::Fail),
            Self::Ans => Some(StopKind::Ans),
            Self::Wait | Self::Timeout => None,
        }
    }
}

impl From<StopKind> for Primitive {
    fn from(kind: StopKind) -> Self {
        match kind {
            StopKind::Done => Self::Done,
            StopKind::Fail => Self::Fail,
            StopKind::Ans => Self::Ans,
            StopKind::Timeout => Self::Timeout,
        }
    }
}

/// The primitives a task exposes to its proposer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllowedActions {
    primitives: BTreeSet<Primitive>,
}

impl AllowedActions {
    pub fn new(primitives: impl IntoIterator<Item = Primitive>) -> Self {
        Self {
            primitives: primitives.into_iter().collect(),
        }
    }

    pub fn standard() -> Self {
        Self::new([Primitive::Done, Primitive::Fail, Primitive::Wait])
    }

    pub fn insert(&mut self, primitive: Primitive) {
        self.primitives.insert(primitive);
    }

    pub fn contains(&self, primitive: Primitive) -> bool {
        self.primitives.contains(&primitive)
    }

    pub fn iter(&self) -> impl Iterator<Item = Primitive> + '_ {
        self.primitives.iter().copied()
    }

    /// Returns the allowed primitive named by the first word of `code`, if any.
    pub fn match_code(&self, code: &str) -> Option<Primitive> {
        let head = code.split_whitespace().next()?;
        self.primitives
            .iter()
            .copied()
            .find(|primitive| primitive.as_str() == head)
    }
}

#[cfg(test)]
mod tests {
    use super::{AllowedActions, Primitive, StopKind, StopSignal};

    #[test]
    fn manual_input_parses_kind_and_args() {
        assert_eq!(
            StopSignal::parse_manual("ANS 42 apples"),
            StopSignal::new(StopKind::Ans, ["42", "apples"])
        );
        assert_eq!(StopSignal::parse_manual("DONE"), StopSignal::new(StopKind::Done, Vec::<String>::new()));
    }

    #[test]
    fn manual_input_defaults_to_timeout() {
        assert_eq!(StopSignal::parse_manual(""), StopSignal::timeout());
        assert_eq!(StopSignal::parse_manual("finish it"), StopSignal::timeout());
    }

    #[test]
    fn answer_primitive_is_hidden_by_default() {
        let allowed = AllowedActions::standard();
        assert_eq!(allowed.match_code("  DONE"), Some(Primitive::Done));
        assert_eq!(allowed.match_code("ANS 3"), None);
        assert_eq!(allowed.match_code("pyautogui.click(1, 2)"), None);
    }

    #[test]
    fn primitive_must_be_the_whole_first_word() {
        let mut allowed = AllowedActions::standard();
        allowed.insert(Primitive::Ans);

        assert_eq!(allowed.match_code("ANS 42"), Some(Primitive::Ans));
        assert_eq!(allowed.match_code("WAIT\n"), Some(Primitive::Wait));
        assert_eq!(allowed.match_code("ANSWER = solve(x)"), None);
        assert_eq!(allowed.match_code("DONE_flag = 1"), None);
        assert_eq!(allowed.match_code("FAILURES.clear()"), None);
        assert_eq!(allowed.match_code(""), None);
    }
}

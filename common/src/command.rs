#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandToken {
    Index,
    TurnOn,
    TurnOff,
}

impl CommandToken {
    pub const PRIORITY: [CommandToken; 3] = [Self::Index, Self::TurnOn, Self::TurnOff];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index.html",
            Self::TurnOn => "turnmeon",
            Self::TurnOff => "turnmeoff",
        }
    }

    pub fn longest_len() -> usize {
        Self::PRIORITY
            .iter()
            .map(|token| token.as_str().len())
            .max()
            .unwrap_or(0)
    }

    pub fn recognize(bytes: &[u8]) -> Option<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|token| contains(bytes, token.as_str().as_bytes()))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|window| window == needle)
}

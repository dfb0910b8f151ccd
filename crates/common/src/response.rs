use crate::config::ResponseStyle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Success,
    Info,
    Warning,
    Error,
    General,
}

impl ResponseKind {
    /// SGR parameters used when rendering inside an `ansi` code block.
    fn sgr(self) -> &'static str {
        match self {
            Self::Success => "1;32",
            Self::Info => "0;36",
            Self::Warning => "1;33",
            Self::Error => "1;31",
            Self::General => "0;37",
        }
    }

    fn plain_prefix(self) -> &'static str {
        match self {
            Self::Warning => "warning: ",
            Self::Error => "error: ",
            Self::Success | Self::Info | Self::General => "",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseKind,
    pub text: String,
}

impl Response {
    pub fn new(kind: ResponseKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Success, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Error, text)
    }

    pub fn general(text: impl Into<String>) -> Self {
        Self::new(ResponseKind::General, text)
    }
}

/// One outgoing chat message built from styled parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    parts: Vec<Response>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, part: Response) -> Self {
        self.parts.push(part);
        self
    }

    pub fn push(&mut self, part: Response) {
        self.parts.push(part);
    }

    pub fn parts(&self) -> &[Response] {
        &self.parts
    }

    pub fn render(&self, style: ResponseStyle) -> String {
        match style {
            ResponseStyle::Plain => self
                .parts
                .iter()
                .map(|part| format!("{}{}", part.kind.plain_prefix(), part.text))
                .collect::<Vec<_>>()
                .join("\n"),
            ResponseStyle::Ansi => {
                let body = self
                    .parts
                    .iter()
                    .map(|part| format!("\u{1b}[{}m{}\u{1b}[0m", part.kind.sgr(), part.text))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("```ansi\n{body}\n```")
            }
        }
    }
}

impl From<Response> for Reply {
    fn from(part: Response) -> Self {
        Self { parts: vec![part] }
    }
}

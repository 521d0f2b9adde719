//! Probes and attach points.

use std::fmt;

use crate::ast::stmt::Block;
use crate::ast::Expr;
use crate::foundation::Span;

/// Probe family, selected by the attach-point provider string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeType {
    Kprobe,
    Kretprobe,
    Uprobe,
    Uretprobe,
    Usdt,
    Tracepoint,
    RawTracepoint,
    Fentry,
    Fexit,
    Profile,
    Interval,
    Software,
    Hardware,
    Begin,
    End,
    SelfTrigger,
    Watchpoint,
    AsyncWatchpoint,
    Iter,
    Invalid,
}

impl ProbeType {
    /// Resolve a provider string, including the short aliases.
    pub fn from_provider(provider: &str) -> ProbeType {
        match provider {
            "kprobe" | "k" => ProbeType::Kprobe,
            "kretprobe" | "kr" => ProbeType::Kretprobe,
            "uprobe" | "u" => ProbeType::Uprobe,
            "uretprobe" | "ur" => ProbeType::Uretprobe,
            "usdt" | "U" => ProbeType::Usdt,
            "tracepoint" | "t" => ProbeType::Tracepoint,
            "rawtracepoint" | "rt" => ProbeType::RawTracepoint,
            "fentry" | "kfunc" | "f" => ProbeType::Fentry,
            "fexit" | "kretfunc" | "fr" => ProbeType::Fexit,
            "profile" | "p" => ProbeType::Profile,
            "interval" | "i" => ProbeType::Interval,
            "software" | "s" => ProbeType::Software,
            "hardware" | "h" => ProbeType::Hardware,
            "BEGIN" => ProbeType::Begin,
            "END" => ProbeType::End,
            "self" => ProbeType::SelfTrigger,
            "watchpoint" | "w" => ProbeType::Watchpoint,
            "asyncwatchpoint" | "aw" => ProbeType::AsyncWatchpoint,
            "iter" | "it" => ProbeType::Iter,
            _ => ProbeType::Invalid,
        }
    }

    /// Families whose handlers run on a kernel function boundary and expose
    /// typed `args`.
    pub fn supports_args(&self) -> bool {
        matches!(
            self,
            ProbeType::Tracepoint
                | ProbeType::RawTracepoint
                | ProbeType::Fentry
                | ProbeType::Fexit
                | ProbeType::Uprobe
        )
    }

    /// Families that fire with a live register context.
    pub fn has_ctx(&self) -> bool {
        !matches!(self, ProbeType::Begin | ProbeType::End | ProbeType::SelfTrigger)
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeType::Kprobe => "kprobe",
            ProbeType::Kretprobe => "kretprobe",
            ProbeType::Uprobe => "uprobe",
            ProbeType::Uretprobe => "uretprobe",
            ProbeType::Usdt => "usdt",
            ProbeType::Tracepoint => "tracepoint",
            ProbeType::RawTracepoint => "rawtracepoint",
            ProbeType::Fentry => "fentry",
            ProbeType::Fexit => "fexit",
            ProbeType::Profile => "profile",
            ProbeType::Interval => "interval",
            ProbeType::Software => "software",
            ProbeType::Hardware => "hardware",
            ProbeType::Begin => "BEGIN",
            ProbeType::End => "END",
            ProbeType::SelfTrigger => "self",
            ProbeType::Watchpoint => "watchpoint",
            ProbeType::AsyncWatchpoint => "asyncwatchpoint",
            ProbeType::Iter => "iter",
            ProbeType::Invalid => "invalid",
        };
        write!(f, "{name}")
    }
}

/// One attach point: `provider:part:part...`.
///
/// The attach-point parser (an earlier pass) has already split the colon
/// components; the semantic analyser interprets them per family.
#[derive(Debug, Clone)]
pub struct AttachPoint {
    pub provider: String,
    /// Colon-separated components after the provider
    pub parts: Vec<String>,
    pub span: Span,
}

impl AttachPoint {
    pub fn new(provider: impl Into<String>, parts: Vec<String>, span: Span) -> Self {
        Self {
            provider: provider.into(),
            parts,
            span,
        }
    }

    /// Build from the `provider:a:b` source form.
    pub fn parse(raw: &str, span: Span) -> Self {
        let mut split = raw.split(':');
        let provider = split.next().unwrap_or_default().to_string();
        let parts = split.map(str::to_string).collect();
        Self {
            provider,
            parts,
            span,
        }
    }

    pub fn probe_type(&self) -> ProbeType {
        ProbeType::from_provider(&self.provider)
    }

    /// First component: tracepoint category, uprobe binary, profile unit...
    pub fn target(&self) -> &str {
        self.parts.first().map(String::as_str).unwrap_or("")
    }

    /// Second component: event or function name, frequency value...
    pub fn func(&self) -> &str {
        self.parts.get(1).map(String::as_str).unwrap_or("")
    }
}

/// A probe: attach points, an optional predicate and a body.
#[derive(Debug, Clone)]
pub struct Probe {
    pub attach_points: Vec<AttachPoint>,
    pub predicate: Option<Expr>,
    pub block: Block,
    pub span: Span,
}

impl Probe {
    pub fn new(attach_points: Vec<AttachPoint>, predicate: Option<Expr>, block: Block) -> Self {
        let span = attach_points
            .first()
            .map(|ap| ap.span)
            .unwrap_or(block.span);
        Self {
            attach_points,
            predicate,
            block,
            span,
        }
    }

    /// The family of the first attach point.
    pub fn probe_type(&self) -> ProbeType {
        self.attach_points
            .first()
            .map(AttachPoint::probe_type)
            .unwrap_or(ProbeType::Invalid)
    }

    /// Whether any attach point belongs to the given family.
    pub fn has_type(&self, ty: ProbeType) -> bool {
        self.attach_points.iter().any(|ap| ap.probe_type() == ty)
    }

    /// Whether all attach points share one family.
    pub fn single_type(&self) -> bool {
        self.attach_points
            .windows(2)
            .all(|w| w[0].probe_type() == w[1].probe_type())
    }
}

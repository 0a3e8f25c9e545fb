use serde::Serialize;
use serde_json::Value;

use crate::diagnostics::{Diagnostic, Location, Position, Span, Stage};
use crate::tree::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonoErrorKind {
    /// The annotated tree violates a structural rule the front end should have enforced.
    Malformed,
    Placement,
    RestrictionViolation,
    BindingConflict,
    UnresolvedBinding,
    GenericAsValue,
    NonConvergence,
    Internal,
}

impl MonoErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            MonoErrorKind::Malformed => "GM-0100",
            MonoErrorKind::Placement => "GM-0101",
            MonoErrorKind::RestrictionViolation => "GM-0102",
            MonoErrorKind::BindingConflict => "GM-0103",
            MonoErrorKind::UnresolvedBinding => "GM-0104",
            MonoErrorKind::GenericAsValue => "GM-0105",
            MonoErrorKind::NonConvergence => "GM-0106",
            MonoErrorKind::Internal => "GM-0199",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            MonoErrorKind::Malformed | MonoErrorKind::Placement => Stage::Register,
            MonoErrorKind::RestrictionViolation
            | MonoErrorKind::BindingConflict
            | MonoErrorKind::UnresolvedBinding => Stage::Resolve,
            MonoErrorKind::NonConvergence => Stage::Instantiate,
            MonoErrorKind::GenericAsValue => Stage::Rewrite,
            MonoErrorKind::Internal => Stage::Emit,
        }
    }
}

/// Any failure of the engine. Every error aborts the whole run.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct MonoError {
    pub kind: MonoErrorKind,
    pub code: &'static str,
    pub message: String,
    /// Declaration whose code contains the offending site.
    pub decl: Option<String>,
    pub pos: Option<Pos>,
}

impl MonoError {
    pub fn new(kind: MonoErrorKind, message: String) -> Self {
        Self {
            kind,
            code: kind.code(),
            message,
            decl: None,
            pos: None,
        }
    }

    /// Attach the enclosing declaration unless a more specific one is already set.
    pub fn in_decl(mut self, decl: &str) -> Self {
        if self.decl.is_none() {
            self.decl = Some(decl.to_string());
        }
        self
    }

    pub fn at(mut self, pos: Option<Pos>) -> Self {
        if self.pos.is_none() {
            self.pos = pos;
        }
        self
    }

    /// One-line human readable form including the location.
    pub fn describe(&self) -> String {
        let mut out = self.to_string();
        match (&self.decl, self.pos) {
            (Some(d), Some(p)) => out.push_str(&format!(" (in {d} at {p})")),
            (Some(d), None) => out.push_str(&format!(" (in {d})")),
            (None, Some(p)) => out.push_str(&format!(" (at {p})")),
            (None, None) => {}
        }
        out
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut d = Diagnostic::error(self.code, self.kind.stage(), &self.message);
        d.data.insert(
            "kind".to_string(),
            serde_json::to_value(self.kind).unwrap_or(Value::Null),
        );
        if let Some(decl) = &self.decl {
            d.data
                .insert("decl".to_string(), Value::String(decl.clone()));
            d.related.push(Location::Decl { name: decl.clone() });
        }
        if let Some(p) = self.pos {
            let at = Position {
                line: p.line,
                col: p.col,
            };
            d.loc = Some(Location::Text {
                span: Span {
                    start: at.clone(),
                    end: at,
                    file: None,
                },
                snippet: None,
            });
        } else if let Some(decl) = &self.decl {
            d.loc = Some(Location::Decl { name: decl.clone() });
        }
        d
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gomono_contracts::{GOMONO_TREE_SCHEMA_VERSION, GOMONO_TREE_SCHEMA_VERSIONS_SUPPORTED};

/// Source position attached by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Restriction {
    Eq,
    Ord,
    Num,
}

impl Restriction {
    pub fn as_str(self) -> &'static str {
        match self {
            Restriction::Eq => "eq",
            Restriction::Ord => "ord",
            Restriction::Num => "num",
        }
    }
}

/// A type expression of the annotated tree.
///
/// `Intro` marks the position that introduces a type parameter (`$T`, optionally
/// with restriction tags); `Param` is every later reference to it. `Inst` is a
/// reference to a generic type applied to explicit type arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    Named {
        name: String,
    },
    Param {
        name: String,
    },
    Intro {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        restrictions: Vec<Restriction>,
    },
    Inst {
        name: String,
        args: Vec<Type>,
    },
    Pointer {
        elem: Box<Type>,
    },
    Slice {
        elem: Box<Type>,
    },
    Array {
        len: u64,
        elem: Box<Type>,
    },
    Map {
        key: Box<Type>,
        value: Box<Type>,
    },
    Chan {
        elem: Box<Type>,
    },
    Func {
        #[serde(default)]
        params: Vec<Type>,
        #[serde(default)]
        results: Vec<Type>,
    },
    Struct {
        #[serde(default)]
        fields: Vec<Field>,
    },
    Interface {
        #[serde(default)]
        methods: Vec<MethodSpec>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    #[serde(default, skip_serializing_if = "is_false")]
    pub embedded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Type>,
    #[serde(default)]
    pub results: Vec<Type>,
}

impl Type {
    pub fn named(name: &str) -> Self {
        Type::Named {
            name: name.to_string(),
        }
    }

    pub fn as_named(&self) -> Option<&str> {
        match self {
            Type::Named { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// True when the type mentions no type parameter (neither an introduction nor a reference).
    pub fn is_concrete(&self) -> bool {
        let mut concrete = true;
        self.for_each(&mut |t| {
            if matches!(t, Type::Param { .. } | Type::Intro { .. }) {
                concrete = false;
            }
        });
        concrete
    }

    pub fn max_depth(&self) -> usize {
        1 + self.children().map(Type::max_depth).max().unwrap_or(0)
    }

    /// Pre-order traversal over this type and every nested type.
    pub fn for_each(&self, f: &mut dyn FnMut(&Type)) {
        f(self);
        for c in self.children() {
            c.for_each(f);
        }
    }

    fn children(&self) -> Box<dyn Iterator<Item = &Type> + '_> {
        match self {
            Type::Named { .. } | Type::Param { .. } | Type::Intro { .. } => {
                Box::new(std::iter::empty())
            }
            Type::Inst { args, .. } => Box::new(args.iter()),
            Type::Pointer { elem }
            | Type::Slice { elem }
            | Type::Array { elem, .. }
            | Type::Chan { elem } => Box::new(std::iter::once(elem.as_ref())),
            Type::Map { key, value } => Box::new([key.as_ref(), value.as_ref()].into_iter()),
            Type::Func { params, results } => Box::new(params.iter().chain(results.iter())),
            Type::Struct { fields } => Box::new(fields.iter().map(|f| &f.ty)),
            Type::Interface { methods } => Box::new(
                methods
                    .iter()
                    .flat_map(|m| m.params.iter().chain(m.results.iter())),
            ),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, items: &[Type]) -> fmt::Result {
            for (i, t) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{t}")?;
            }
            Ok(())
        }

        match self {
            Type::Named { name } | Type::Param { name } => f.write_str(name),
            Type::Intro { name, restrictions } => {
                write!(f, "${name}")?;
                for r in restrictions {
                    write!(f, ":{}", r.as_str())?;
                }
                Ok(())
            }
            Type::Inst { name, args } => {
                write!(f, "{name}(")?;
                list(f, args)?;
                f.write_str(")")
            }
            Type::Pointer { elem } => write!(f, "*{elem}"),
            Type::Slice { elem } => write!(f, "[]{elem}"),
            Type::Array { len, elem } => write!(f, "[{len}]{elem}"),
            Type::Map { key, value } => write!(f, "map[{key}]{value}"),
            Type::Chan { elem } => write!(f, "chan {elem}"),
            Type::Func { params, results } => {
                f.write_str("func(")?;
                list(f, params)?;
                f.write_str(")")?;
                match results.len() {
                    0 => Ok(()),
                    1 => write!(f, " {}", results[0]),
                    _ => {
                        f.write_str(" (")?;
                        list(f, results)?;
                        f.write_str(")")
                    }
                }
            }
            Type::Struct { fields } => {
                f.write_str("struct{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    if field.embedded {
                        write!(f, "{}", field.ty)?;
                    } else {
                        write!(f, "{} {}", field.name, field.ty)?;
                    }
                }
                f.write_str("}")
            }
            Type::Interface { methods } => {
                if methods.is_empty() {
                    return f.write_str("interface{}");
                }
                f.write_str("interface{")?;
                for (i, m) in methods.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}(", m.name)?;
                    list(f, &m.params)?;
                    f.write_str(")")?;
                    if !m.results.is_empty() {
                        f.write_str(" (")?;
                        list(f, &m.results)?;
                        f.write_str(")")?;
                    }
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub ty: Type,
}

impl Param {
    /// A value-less marker parameter: `($T)` with no name and nothing but the introduction.
    pub fn is_unnamed_marker(&self) -> bool {
        self.name.is_none() && matches!(self.ty, Type::Intro { .. })
    }
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Param>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub results: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Pos>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeParamDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<Restriction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_params: Vec<TypeParamDecl>,
    pub underlying: Type,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Pos>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub constant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<Type>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Pos>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decl {
    Func(FuncDecl),
    Type(TypeDecl),
    Var(VarDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Func(f) => &f.name,
            Decl::Type(t) => &t.name,
            Decl::Var(v) => &v.name,
        }
    }

    pub fn pos(&self) -> Option<Pos> {
        match self {
            Decl::Func(f) => f.pos,
            Decl::Type(t) => t.pos,
            Decl::Var(v) => v.pos,
        }
    }

    /// Name used for diagnostics: methods are shown as `Recv.Method`.
    pub fn display_name(&self) -> String {
        match self {
            Decl::Func(FuncDecl {
                name,
                receiver: Some(r),
                ..
            }) => match receiver_type_name(&r.ty) {
                Some(recv) => format!("{recv}.{name}"),
                None => name.clone(),
            },
            _ => self.name().to_string(),
        }
    }
}

/// Name of the (possibly pointer-wrapped) receiver base type.
pub fn receiver_type_name(ty: &Type) -> Option<&str> {
    match ty {
        Type::Pointer { elem } => receiver_type_name(elem),
        Type::Named { name } | Type::Inst { name, .. } => Some(name.as_str()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    Expr {
        expr: Expr,
    },
    Var {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Assign {
        lhs: Vec<Expr>,
        op: String,
        rhs: Vec<Expr>,
    },
    IncDec {
        target: Expr,
        op: String,
    },
    Return {
        #[serde(default)]
        values: Vec<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    If {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<Box<Stmt>>,
        cond: Expr,
        then: Block,
        #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
        els: Option<Box<Stmt>>,
    },
    For {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<Box<Stmt>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cond: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        post: Option<Box<Stmt>>,
        body: Block,
    },
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_false")]
        define: bool,
        expr: Expr,
        body: Block,
    },
    Block {
        body: Block,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Expr>,
    pub value: Expr,
}

/// Expressions carry the type the front end inferred for them in `ty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Ident {
        name: String,
        /// Bound in a local scope; never a reference to a package-level declaration.
        #[serde(default, skip_serializing_if = "is_false")]
        local: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Lit {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    /// A type passed in value position: an explicit type argument.
    TypeLit {
        ty: Type,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    /// A generic function applied to explicit type arguments: `Min(int)`.
    Instantiate {
        name: String,
        type_args: Vec<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Call {
        func: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Selector {
        base: Box<Expr>,
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    SliceExpr {
        base: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low: Option<Box<Expr>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        high: Option<Box<Expr>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    Composite {
        ty: Type,
        #[serde(default)]
        elems: Vec<Element>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
    FuncLit {
        #[serde(default)]
        params: Vec<Param>,
        #[serde(default)]
        results: Vec<Param>,
        body: Block,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Pos>,
    },
}

impl Expr {
    pub fn pos(&self) -> Option<Pos> {
        match self {
            Expr::Ident { pos, .. }
            | Expr::Lit { pos, .. }
            | Expr::TypeLit { pos, .. }
            | Expr::Instantiate { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Selector { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::SliceExpr { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Composite { pos, .. }
            | Expr::FuncLit { pos, .. } => *pos,
        }
    }

    /// The type-checked type of the expression, when the front end recorded one.
    pub fn ty(&self) -> Option<&Type> {
        match self {
            Expr::Ident { ty, .. }
            | Expr::Lit { ty, .. }
            | Expr::Instantiate { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Selector { ty, .. }
            | Expr::Index { ty, .. }
            | Expr::SliceExpr { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. } => ty.as_ref(),
            Expr::Composite { ty, .. } => Some(ty),
            Expr::TypeLit { .. } | Expr::FuncLit { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub schema_version: String,
    pub package: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub decls: Vec<Decl>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

pub fn parse_tree_json(bytes: &[u8]) -> Result<SourceFile, String> {
    let v: Value = serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))?;
    let version = v
        .get("schema_version")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing schema_version".to_string())?;
    if !GOMONO_TREE_SCHEMA_VERSIONS_SUPPORTED.contains(&version) {
        return Err(format!(
            "unsupported schema_version: {version:?} (expected {GOMONO_TREE_SCHEMA_VERSION:?})"
        ));
    }
    serde_json::from_value(v).map_err(|e| format!("invalid annotated tree: {e}"))
}

/// Canonical JSON text of a tree: object keys sorted, trailing newline.
pub fn tree_to_canonical_json(file: &SourceFile) -> Result<String, serde_json::Error> {
    let mut v = serde_json::to_value(file)?;
    canon_value_jcs(&mut v);
    Ok(serde_json::to_string(&v)? + "\n")
}

pub fn canon_value_jcs(v: &mut Value) {
    match v {
        Value::Array(items) => {
            for item in items {
                canon_value_jcs(item);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            for (_, value) in entries.iter_mut() {
                canon_value_jcs(value);
            }
            entries.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
            for (k, v) in entries {
                map.insert(k, v);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}

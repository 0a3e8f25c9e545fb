//! Site rewriting inside non-generic code.
//!
//! A site is a call of a generic function, an explicit instantiation of one, or a
//! reference to a generic type with type arguments. Each site is replaced by a
//! reference to the specialization the `Instantiator` hands back.

use crate::cache::SiteRef;
use crate::error::{MonoError, MonoErrorKind};
use crate::tree::{Decl, Expr, Pos, SourceFile, Stmt, Type};
use crate::visit::{walk_decl, walk_expr, walk_stmt, walk_type, VisitorMut};

/// Result of specializing a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRewrite {
    pub specialized: String,
    /// Argument positions that carried only a type and disappear from the call.
    pub dropped_args: Vec<usize>,
}

/// Creates (or finds) specializations on behalf of the rewriter.
pub trait Instantiator {
    fn is_generic_func(&self, name: &str) -> bool;

    fn is_generic_type(&self, name: &str) -> bool;

    fn call_site(
        &mut self,
        name: &str,
        args: &[Expr],
        site: SiteRef,
    ) -> Result<CallRewrite, MonoError>;

    fn explicit_site(
        &mut self,
        name: &str,
        type_args: &[Type],
        site: SiteRef,
    ) -> Result<String, MonoError>;

    fn type_site(&mut self, name: &str, args: &[Type], site: SiteRef) -> Result<String, MonoError>;
}

pub struct SiteRewriter<'a, I: Instantiator + ?Sized> {
    inst: &'a mut I,
    decl: String,
    pos: Option<Pos>,
    rewritten: usize,
}

impl<'a, I: Instantiator + ?Sized> SiteRewriter<'a, I> {
    pub fn new(inst: &'a mut I) -> Self {
        Self {
            inst,
            decl: String::new(),
            pos: None,
            rewritten: 0,
        }
    }

    /// Rewrite every site in `decl`; returns the number of sites replaced.
    pub fn rewrite_decl(&mut self, decl: &mut Decl) -> Result<usize, MonoError> {
        self.decl = decl.display_name();
        self.pos = decl.pos();
        self.rewritten = 0;
        let name = self.decl.clone();
        let pos = self.pos;
        walk_decl(self, decl).map_err(|e| e.in_decl(&name).at(pos))?;
        Ok(self.rewritten)
    }

    fn site(&self) -> SiteRef {
        SiteRef {
            decl: self.decl.clone(),
            pos: self.pos,
        }
    }

    fn generic_callee(&self, func: &Expr) -> Option<String> {
        match func {
            Expr::Ident {
                name, local: false, ..
            } if self.inst.is_generic_func(name) => Some(name.clone()),
            _ => None,
        }
    }

    fn rewrite_call(&mut self, expr: &mut Expr) -> Result<bool, MonoError> {
        let Expr::Call { func, args, ty, .. } = expr else {
            return Ok(false);
        };
        let Some(name) = self.generic_callee(func) else {
            return Ok(false);
        };

        for a in args.iter_mut() {
            self.visit_expr(a)?;
        }
        if let Some(t) = ty {
            self.visit_type(t)?;
        }

        let site = self.site();
        let rw = self.inst.call_site(&name, args, site)?;

        let Expr::Ident {
            ty: callee_ty,
            pos: callee_pos,
            ..
        } = func.as_mut()
        else {
            return Ok(false);
        };
        let callee_pos = *callee_pos;
        let mut callee_ty = callee_ty.take();
        if let Some(Type::Func { params, .. }) = &mut callee_ty {
            if params.len() == args.len() {
                drop_positions(params, &rw.dropped_args);
            }
        }
        if let Some(t) = &mut callee_ty {
            self.visit_type(t)?;
        }
        drop_positions(args, &rw.dropped_args);
        **func = Expr::Ident {
            name: rw.specialized,
            local: false,
            ty: callee_ty,
            pos: callee_pos,
        };
        self.rewritten += 1;
        Ok(true)
    }
}

fn drop_positions<T>(items: &mut Vec<T>, positions: &[usize]) {
    let mut idx = 0usize;
    items.retain(|_| {
        let keep = !positions.contains(&idx);
        idx += 1;
        keep
    });
}

impl<I: Instantiator + ?Sized> VisitorMut for SiteRewriter<'_, I> {
    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), MonoError> {
        let saved = self.pos;
        let pos = expr.pos();
        if pos.is_some() {
            self.pos = pos;
        }
        let out = self.rewrite_expr(expr).map_err(|e| e.at(pos));
        self.pos = saved;
        out
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) -> Result<(), MonoError> {
        let saved = self.pos;
        let pos = match stmt {
            Stmt::Var { pos, .. } | Stmt::Return { pos, .. } => *pos,
            _ => None,
        };
        if pos.is_some() {
            self.pos = pos;
        }
        let out = walk_stmt(self, stmt).map_err(|e| e.at(pos));
        self.pos = saved;
        out
    }

    fn visit_type(&mut self, ty: &mut Type) -> Result<(), MonoError> {
        match ty {
            Type::Inst { name, args } => {
                if !self.inst.is_generic_type(name) {
                    return Err(MonoError::new(
                        MonoErrorKind::Malformed,
                        format!("{name:?} is applied to type arguments but is not a generic type"),
                    ));
                }
                let site = self.site();
                let specialized = self.inst.type_site(name, args, site)?;
                *ty = Type::Named { name: specialized };
                self.rewritten += 1;
                Ok(())
            }
            Type::Named { name } if self.inst.is_generic_type(name) => Err(MonoError::new(
                MonoErrorKind::GenericAsValue,
                format!("generic type {name:?} used without type arguments"),
            )),
            Type::Intro { name, .. } => Err(MonoError::new(
                MonoErrorKind::Placement,
                format!(
                    "type parameter {name:?} introduced outside the first parenthesized list of a generic declaration"
                ),
            )),
            Type::Param { name } => Err(MonoError::new(
                MonoErrorKind::Malformed,
                format!("type parameter {name:?} referenced outside a generic declaration"),
            )),
            _ => walk_type(self, ty),
        }
    }
}

impl<I: Instantiator + ?Sized> SiteRewriter<'_, I> {
    fn rewrite_expr(&mut self, expr: &mut Expr) -> Result<(), MonoError> {
        if self.rewrite_call(expr)? {
            return Ok(());
        }
        match expr {
            Expr::Instantiate {
                name,
                type_args,
                ty,
                pos,
            } => {
                if !self.inst.is_generic_func(name) {
                    return Err(MonoError::new(
                        MonoErrorKind::Malformed,
                        format!("{name:?} is instantiated but is not a generic function"),
                    ));
                }
                if let Some(t) = ty {
                    self.visit_type(t)?;
                }
                let site = self.site();
                let specialized = self.inst.explicit_site(name, type_args, site)?;
                let ty = ty.take();
                let pos = *pos;
                *expr = Expr::Ident {
                    name: specialized,
                    local: false,
                    ty,
                    pos,
                };
                self.rewritten += 1;
                Ok(())
            }
            Expr::Ident {
                name, local: false, ..
            } if self.inst.is_generic_func(name) => Err(MonoError::new(
                MonoErrorKind::GenericAsValue,
                format!("generic function {name:?} used without a call or explicit type arguments"),
            )),
            _ => walk_expr(self, expr),
        }
    }
}

/// Structural check on an emitted file: no generic syntax may remain.
pub fn assert_no_generic_syntax(file: &SourceFile) -> Result<(), MonoError> {
    struct Checker;

    impl VisitorMut for Checker {
        fn visit_type(&mut self, ty: &mut Type) -> Result<(), MonoError> {
            match ty {
                Type::Intro { .. } | Type::Param { .. } | Type::Inst { .. } => {
                    Err(MonoError::new(
                        MonoErrorKind::Internal,
                        format!("internal error: generic type syntax survived monomorphization: {ty}"),
                    ))
                }
                _ => walk_type(self, ty),
            }
        }

        fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), MonoError> {
            if let Expr::Instantiate { name, .. } = expr {
                return Err(MonoError::new(
                    MonoErrorKind::Internal,
                    format!("internal error: explicit instantiation of {name:?} survived monomorphization"),
                ));
            }
            walk_expr(self, expr)
        }
    }

    for decl in &file.decls {
        if let Decl::Type(t) = decl {
            if !t.type_params.is_empty() {
                return Err(MonoError::new(
                    MonoErrorKind::Internal,
                    format!("internal error: generic type {:?} survived monomorphization", t.name),
                ));
            }
        }
        let mut copy = decl.clone();
        walk_decl(&mut Checker, &mut copy).map_err(|e| e.in_decl(&decl.display_name()))?;
    }
    Ok(())
}

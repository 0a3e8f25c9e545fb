//! Mutable traversal over the annotated tree.
//!
//! Implementors override the hooks they care about and call the matching `walk_*`
//! function to continue into children. Every type position is reached through
//! `visit_type`: signatures, expression annotations, type literals, composite
//! literal types, local declarations and explicit type arguments.

use crate::error::MonoError;
use crate::tree::{Block, Decl, Expr, FuncDecl, Param, Stmt, Type};

pub trait VisitorMut {
    fn visit_type(&mut self, ty: &mut Type) -> Result<(), MonoError> {
        walk_type(self, ty)
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), MonoError> {
        walk_expr(self, expr)
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) -> Result<(), MonoError> {
        walk_stmt(self, stmt)
    }
}

pub fn walk_type<V: VisitorMut + ?Sized>(v: &mut V, ty: &mut Type) -> Result<(), MonoError> {
    match ty {
        Type::Named { .. } | Type::Param { .. } | Type::Intro { .. } => Ok(()),
        Type::Inst { args, .. } => args.iter_mut().try_for_each(|a| v.visit_type(a)),
        Type::Pointer { elem }
        | Type::Slice { elem }
        | Type::Array { elem, .. }
        | Type::Chan { elem } => v.visit_type(elem),
        Type::Map { key, value } => {
            v.visit_type(key)?;
            v.visit_type(value)
        }
        Type::Func { params, results } => params
            .iter_mut()
            .chain(results.iter_mut())
            .try_for_each(|t| v.visit_type(t)),
        Type::Struct { fields } => fields.iter_mut().try_for_each(|f| v.visit_type(&mut f.ty)),
        Type::Interface { methods } => methods.iter_mut().try_for_each(|m| {
            m.params
                .iter_mut()
                .chain(m.results.iter_mut())
                .try_for_each(|t| v.visit_type(t))
        }),
    }
}

fn visit_opt_type<V: VisitorMut + ?Sized>(
    v: &mut V,
    ty: &mut Option<Type>,
) -> Result<(), MonoError> {
    match ty {
        Some(t) => v.visit_type(t),
        None => Ok(()),
    }
}

pub fn walk_params<V: VisitorMut + ?Sized>(
    v: &mut V,
    params: &mut [Param],
) -> Result<(), MonoError> {
    params.iter_mut().try_for_each(|p| v.visit_type(&mut p.ty))
}

pub fn walk_block<V: VisitorMut + ?Sized>(v: &mut V, block: &mut Block) -> Result<(), MonoError> {
    block.iter_mut().try_for_each(|s| v.visit_stmt(s))
}

pub fn walk_expr<V: VisitorMut + ?Sized>(v: &mut V, expr: &mut Expr) -> Result<(), MonoError> {
    match expr {
        Expr::Ident { ty, .. } | Expr::Lit { ty, .. } => visit_opt_type(v, ty),
        Expr::TypeLit { ty, .. } => v.visit_type(ty),
        Expr::Instantiate { type_args, ty, .. } => {
            type_args.iter_mut().try_for_each(|t| v.visit_type(t))?;
            visit_opt_type(v, ty)
        }
        Expr::Call { func, args, ty, .. } => {
            v.visit_expr(func)?;
            args.iter_mut().try_for_each(|a| v.visit_expr(a))?;
            visit_opt_type(v, ty)
        }
        Expr::Selector { base, ty, .. } => {
            v.visit_expr(base)?;
            visit_opt_type(v, ty)
        }
        Expr::Index {
            base, index, ty, ..
        } => {
            v.visit_expr(base)?;
            v.visit_expr(index)?;
            visit_opt_type(v, ty)
        }
        Expr::SliceExpr {
            base,
            low,
            high,
            ty,
            ..
        } => {
            v.visit_expr(base)?;
            if let Some(low) = low {
                v.visit_expr(low)?;
            }
            if let Some(high) = high {
                v.visit_expr(high)?;
            }
            visit_opt_type(v, ty)
        }
        Expr::Unary { operand, ty, .. } => {
            v.visit_expr(operand)?;
            visit_opt_type(v, ty)
        }
        Expr::Binary { lhs, rhs, ty, .. } => {
            v.visit_expr(lhs)?;
            v.visit_expr(rhs)?;
            visit_opt_type(v, ty)
        }
        Expr::Composite { ty, elems, .. } => {
            v.visit_type(ty)?;
            for el in elems {
                if let Some(k) = &mut el.key {
                    v.visit_expr(k)?;
                }
                v.visit_expr(&mut el.value)?;
            }
            Ok(())
        }
        Expr::FuncLit {
            params,
            results,
            body,
            ..
        } => {
            walk_params(v, params)?;
            walk_params(v, results)?;
            walk_block(v, body)
        }
    }
}

pub fn walk_stmt<V: VisitorMut + ?Sized>(v: &mut V, stmt: &mut Stmt) -> Result<(), MonoError> {
    match stmt {
        Stmt::Expr { expr } => v.visit_expr(expr),
        Stmt::Var { ty, value, .. } => {
            visit_opt_type(v, ty)?;
            match value {
                Some(e) => v.visit_expr(e),
                None => Ok(()),
            }
        }
        Stmt::Assign { lhs, rhs, .. } => lhs
            .iter_mut()
            .chain(rhs.iter_mut())
            .try_for_each(|e| v.visit_expr(e)),
        Stmt::IncDec { target, .. } => v.visit_expr(target),
        Stmt::Return { values, .. } => values.iter_mut().try_for_each(|e| v.visit_expr(e)),
        Stmt::If {
            init,
            cond,
            then,
            els,
        } => {
            if let Some(init) = init {
                v.visit_stmt(init)?;
            }
            v.visit_expr(cond)?;
            walk_block(v, then)?;
            match els {
                Some(e) => v.visit_stmt(e),
                None => Ok(()),
            }
        }
        Stmt::For {
            init,
            cond,
            post,
            body,
        } => {
            if let Some(init) = init {
                v.visit_stmt(init)?;
            }
            if let Some(cond) = cond {
                v.visit_expr(cond)?;
            }
            if let Some(post) = post {
                v.visit_stmt(post)?;
            }
            walk_block(v, body)
        }
        Stmt::Range {
            key,
            value,
            expr,
            body,
            ..
        } => {
            if let Some(k) = key {
                v.visit_expr(k)?;
            }
            if let Some(val) = value {
                v.visit_expr(val)?;
            }
            v.visit_expr(expr)?;
            walk_block(v, body)
        }
        Stmt::Block { body } => walk_block(v, body),
        Stmt::Break | Stmt::Continue => Ok(()),
    }
}

/// Visit the parts of a function that lie outside its first parenthesized list.
pub fn walk_func_rest<V: VisitorMut + ?Sized>(
    v: &mut V,
    f: &mut FuncDecl,
) -> Result<(), MonoError> {
    walk_params(v, &mut f.results)?;
    match &mut f.body {
        Some(body) => walk_block(v, body),
        None => Ok(()),
    }
}

pub fn walk_decl<V: VisitorMut + ?Sized>(v: &mut V, decl: &mut Decl) -> Result<(), MonoError> {
    match decl {
        Decl::Func(f) => {
            if let Some(r) = &mut f.receiver {
                v.visit_type(&mut r.ty)?;
            }
            walk_params(v, &mut f.params)?;
            walk_func_rest(v, f)
        }
        Decl::Type(t) => v.visit_type(&mut t.underlying),
        Decl::Var(var) => {
            visit_opt_type(v, &mut var.ty)?;
            match &mut var.value {
                Some(e) => v.visit_expr(e),
                None => Ok(()),
            }
        }
    }
}

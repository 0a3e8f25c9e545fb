//! The whole-file driver: rewrite sites in non-generic code until nothing changes.
//!
//! Each cycle scans every non-generic declaration (including the specializations
//! emitted by earlier cycles), replaces every site it finds and appends the
//! declarations the cycle created. A cycle that rewrites nothing and creates
//! nothing means the tree has converged. Generic declarations are then dropped.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace};

use gomono_contracts::GOMONO_MONO_MAP_SCHEMA_VERSION;

use crate::binding::{resolve_call, resolve_explicit};
use crate::cache::{
    type_value, InstantiationCache, SiteRef, DEFAULT_MAX_SPECIALIZATIONS,
    DEFAULT_MAX_TYPE_DEPTH,
};
use crate::error::{MonoError, MonoErrorKind};
use crate::registry::Registry;
use crate::restrict::TypeEnv;
use crate::rewrite::{assert_no_generic_syntax, CallRewrite, Instantiator, SiteRewriter};
use crate::subst::instantiate_underlying;
use crate::tree::{tree_to_canonical_json, Decl, Expr, SourceFile, Type};

pub const DEFAULT_MAX_CYCLES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonoOptions {
    pub max_cycles: usize,
    pub max_specializations: usize,
    pub max_type_depth: usize,
}

impl Default for MonoOptions {
    fn default() -> Self {
        Self {
            max_cycles: DEFAULT_MAX_CYCLES,
            max_specializations: DEFAULT_MAX_SPECIALIZATIONS,
            max_type_depth: DEFAULT_MAX_TYPE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Scanning,
    Resolving,
    Instantiating,
    Rewriting,
    Converged,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonoStats {
    pub generic_declarations: usize,
    pub specializations_emitted: usize,
    pub sites_rewritten: usize,
    pub cycles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonoItem {
    pub generic: String,
    pub kind: &'static str,
    pub type_args: Vec<Value>,
    pub specialized: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sites: Vec<SiteRef>,
}

/// Record of every specialization in one run.
#[derive(Debug, Clone, Serialize)]
pub struct MonoMap {
    pub schema_version: String,
    pub tool: String,
    pub tool_version: String,
    pub package: String,
    pub limits: MonoOptions,
    pub stats: MonoStats,
    pub items: Vec<MonoItem>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub meta: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct MonoOutput {
    pub file: SourceFile,
    pub mono_map: MonoMap,
}

/// Single-writer context threaded through one run.
pub struct MonoCtx<'r> {
    registry: &'r Registry,
    cache: InstantiationCache,
    state: DriverState,
}

impl<'r> MonoCtx<'r> {
    pub fn new(registry: &'r Registry, options: &MonoOptions) -> Self {
        Self {
            registry,
            cache: InstantiationCache::new(options.max_specializations, options.max_type_depth),
            state: DriverState::Scanning,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cache(&self) -> &InstantiationCache {
        &self.cache
    }

    fn enter(&mut self, state: DriverState) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "driver state");
            self.state = state;
        }
    }
}

fn not_registered(name: &str) -> MonoError {
    MonoError::new(
        MonoErrorKind::Internal,
        format!("internal error: {name:?} is not a registered generic"),
    )
}

impl TypeEnv for MonoCtx<'_> {
    fn underlying(&self, name: &str) -> Option<Type> {
        self.registry
            .named_underlying(name)
            .or_else(|| self.cache.type_underlying(name))
            .cloned()
    }

    fn instantiated_underlying(&self, name: &str, args: &[Type]) -> Option<Type> {
        instantiate_underlying(self.registry.generic_type(name)?, args)
    }
}

impl Instantiator for MonoCtx<'_> {
    fn is_generic_func(&self, name: &str) -> bool {
        self.registry.generic_func(name).is_some()
    }

    fn is_generic_type(&self, name: &str) -> bool {
        self.registry.generic_type(name).is_some()
    }

    fn call_site(
        &mut self,
        name: &str,
        args: &[Expr],
        site: SiteRef,
    ) -> Result<CallRewrite, MonoError> {
        let registry = self.registry;
        let g = registry.generic_func(name).ok_or_else(|| not_registered(name))?;
        self.enter(DriverState::Resolving);
        let binding = resolve_call(g, args, &self.cache, &*self)?;
        self.enter(DriverState::Instantiating);
        let id = self.cache.get_or_create(self.registry, g, &binding, site)?;
        self.enter(DriverState::Rewriting);

        let dropped_args = match &g.decl {
            Decl::Func(f) => f
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_unnamed_marker())
                .map(|(i, _)| i)
                .collect(),
            _ => Vec::new(),
        };
        Ok(CallRewrite {
            specialized: self.cache.get(id).specialized.clone(),
            dropped_args,
        })
    }

    fn explicit_site(
        &mut self,
        name: &str,
        type_args: &[Type],
        site: SiteRef,
    ) -> Result<String, MonoError> {
        let registry = self.registry;
        let g = registry.generic_func(name).ok_or_else(|| not_registered(name))?;
        self.enter(DriverState::Resolving);
        let binding = resolve_explicit(g, type_args, &self.cache, &*self)?;
        self.enter(DriverState::Instantiating);
        let id = self.cache.get_or_create(self.registry, g, &binding, site)?;
        self.enter(DriverState::Rewriting);
        Ok(self.cache.get(id).specialized.clone())
    }

    fn type_site(&mut self, name: &str, args: &[Type], site: SiteRef) -> Result<String, MonoError> {
        let registry = self.registry;
        let g = registry.generic_type(name).ok_or_else(|| not_registered(name))?;
        self.enter(DriverState::Resolving);
        let binding = resolve_explicit(g, args, &self.cache, &*self)?;
        self.enter(DriverState::Instantiating);
        let id = self.cache.get_or_create(self.registry, g, &binding, site)?;
        self.enter(DriverState::Rewriting);
        Ok(self.cache.get(id).specialized.clone())
    }
}

fn digest(file: &SourceFile) -> Result<String, MonoError> {
    let text = tree_to_canonical_json(file).map_err(|e| {
        MonoError::new(
            MonoErrorKind::Internal,
            format!("internal error: serialize tree: {e}"),
        )
    })?;
    Ok(blake3::hash(text.as_bytes()).to_hex().to_string())
}

/// Monomorphize one annotated source file.
///
/// The result is all-or-nothing: any error aborts the run and no partial output
/// is returned.
pub fn monomorphize(file: SourceFile, options: &MonoOptions) -> Result<MonoOutput, MonoError> {
    let input_digest = digest(&file)?;
    let registry = Registry::register(&file)?;
    info!(
        package = %file.package,
        decls = file.decls.len(),
        generics = registry.len(),
        "registered generic declarations"
    );

    let SourceFile {
        schema_version,
        package,
        imports,
        decls,
    } = file;
    let mut decls: Vec<(Decl, bool)> = decls
        .into_iter()
        .enumerate()
        .map(|(idx, d)| (d, registry.is_generic_index(idx)))
        .collect();

    let mut ctx = MonoCtx::new(&registry, options);
    let mut cycles = 0usize;
    let mut sites_total = 0usize;
    loop {
        if cycles >= options.max_cycles {
            return Err(MonoError::new(
                MonoErrorKind::NonConvergence,
                format!(
                    "monomorphization did not converge within max_cycles={}",
                    options.max_cycles
                ),
            ));
        }
        cycles += 1;
        ctx.enter(DriverState::Scanning);

        let mut rewritten = 0usize;
        for (decl, generic) in decls.iter_mut() {
            if *generic {
                continue;
            }
            rewritten += SiteRewriter::new(&mut ctx).rewrite_decl(decl)?;
        }
        let created = ctx.cache.drain_new();
        debug!(
            cycle = cycles,
            sites = rewritten,
            created = created.len(),
            "rewrite cycle"
        );
        sites_total += rewritten;

        if rewritten == 0 && created.is_empty() {
            ctx.enter(DriverState::Converged);
            break;
        }
        decls.extend(created.into_iter().map(|d| (d, false)));
    }

    let out = SourceFile {
        schema_version: schema_version.clone(),
        package: package.clone(),
        imports,
        decls: decls
            .into_iter()
            .filter(|(_, generic)| !generic)
            .map(|(d, _)| d)
            .collect(),
    };
    assert_no_generic_syntax(&out)?;
    info!(
        cycles,
        sites = sites_total,
        specializations = ctx.cache.len(),
        "converged"
    );

    let items = ctx
        .cache
        .iter()
        .map(|s| MonoItem {
            generic: s.key.generic.clone(),
            kind: s.kind.as_str(),
            type_args: s.type_args.iter().map(type_value).collect(),
            specialized: s.specialized.clone(),
            sites: s.sites.clone(),
        })
        .collect();

    let mut meta = BTreeMap::new();
    meta.insert("input_schema_version".to_string(), Value::String(schema_version));
    meta.insert("input_blake3".to_string(), Value::String(input_digest));
    meta.insert("output_blake3".to_string(), Value::String(digest(&out)?));

    let mono_map = MonoMap {
        schema_version: GOMONO_MONO_MAP_SCHEMA_VERSION.to_string(),
        tool: "gomono".to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        package,
        limits: *options,
        stats: MonoStats {
            generic_declarations: registry.len(),
            specializations_emitted: ctx.cache.len(),
            sites_rewritten: sites_total,
            cycles,
        },
        items,
        meta,
    };

    Ok(MonoOutput {
        file: out,
        mono_map,
    })
}

#![allow(dead_code)]

use gomono::tree::{parse_tree_json, Decl, FuncDecl, SourceFile};
use gomono::{monomorphize, MonoError, MonoOptions, MonoOutput};
use serde_json::{json, Value};

pub fn file(decls: Vec<Value>) -> SourceFile {
    let bytes = serde_json::to_vec(&json!({
        "schema_version": gomono_contracts::GOMONO_TREE_SCHEMA_VERSION,
        "package": "main",
        "decls": decls,
    }))
    .expect("encode annotated tree JSON");
    parse_tree_json(&bytes).expect("parse annotated tree")
}

pub fn run(decls: Vec<Value>) -> Result<MonoOutput, MonoError> {
    monomorphize(file(decls), &MonoOptions::default())
}

pub fn run_ok(decls: Vec<Value>) -> MonoOutput {
    match run(decls) {
        Ok(out) => out,
        Err(err) => panic!("monomorphize failed: {}", err.describe()),
    }
}

// Types.

pub fn named(name: &str) -> Value {
    json!({"kind": "named", "name": name})
}

pub fn intro(name: &str) -> Value {
    json!({"kind": "intro", "name": name})
}

pub fn intro_r(name: &str, restrictions: &[&str]) -> Value {
    json!({"kind": "intro", "name": name, "restrictions": restrictions})
}

pub fn tparam(name: &str) -> Value {
    json!({"kind": "param", "name": name})
}

pub fn inst(name: &str, args: Vec<Value>) -> Value {
    json!({"kind": "inst", "name": name, "args": args})
}

pub fn slice(elem: Value) -> Value {
    json!({"kind": "slice", "elem": elem})
}

pub fn ptr(elem: Value) -> Value {
    json!({"kind": "pointer", "elem": elem})
}

pub fn map_ty(key: Value, value: Value) -> Value {
    json!({"kind": "map", "key": key, "value": value})
}

pub fn func_ty(params: Vec<Value>, results: Vec<Value>) -> Value {
    json!({"kind": "func", "params": params, "results": results})
}

pub fn struct_ty(fields: Vec<(&str, Value)>) -> Value {
    let fields: Vec<Value> = fields
        .into_iter()
        .map(|(name, ty)| json!({"name": name, "ty": ty}))
        .collect();
    json!({"kind": "struct", "fields": fields})
}

// Parameters and declarations.

pub fn p(name: &str, ty: Value) -> Value {
    json!({"name": name, "ty": ty})
}

/// A value-less parameter, as in `func Read($T)`.
pub fn marker(ty: Value) -> Value {
    json!({"ty": ty})
}

pub fn result(ty: Value) -> Value {
    json!({"ty": ty})
}

pub fn func(name: &str, params: Vec<Value>, results: Vec<Value>, body: Vec<Value>) -> Value {
    json!({
        "kind": "func",
        "name": name,
        "params": params,
        "results": results,
        "body": body,
    })
}

pub fn method(
    name: &str,
    receiver: Value,
    params: Vec<Value>,
    results: Vec<Value>,
    body: Vec<Value>,
) -> Value {
    json!({
        "kind": "func",
        "name": name,
        "receiver": receiver,
        "params": params,
        "results": results,
        "body": body,
    })
}

pub fn type_decl(name: &str, type_params: Vec<(&str, Vec<&str>)>, underlying: Value) -> Value {
    let tps: Vec<Value> = type_params
        .into_iter()
        .map(|(n, r)| json!({"name": n, "restrictions": r}))
        .collect();
    json!({
        "kind": "type",
        "name": name,
        "type_params": tps,
        "underlying": underlying,
    })
}

// Statements.

pub fn expr_stmt(expr: Value) -> Value {
    json!({"kind": "expr", "expr": expr})
}

pub fn var_stmt(name: &str, ty: Option<Value>, value: Option<Value>) -> Value {
    let mut v = json!({"kind": "var", "name": name});
    if let Some(ty) = ty {
        v["ty"] = ty;
    }
    if let Some(value) = value {
        v["value"] = value;
    }
    v
}

pub fn ret(values: Vec<Value>) -> Value {
    json!({"kind": "return", "values": values})
}

// Expressions.

pub fn ident(name: &str, ty: Value) -> Value {
    json!({"kind": "ident", "name": name, "ty": ty})
}

pub fn global(name: &str) -> Value {
    json!({"kind": "ident", "name": name})
}

pub fn local(name: &str, ty: Value) -> Value {
    json!({"kind": "ident", "name": name, "local": true, "ty": ty})
}

pub fn lit(value: &str, ty: Value) -> Value {
    json!({"kind": "lit", "value": value, "ty": ty})
}

pub fn type_lit(ty: Value) -> Value {
    json!({"kind": "type_lit", "ty": ty})
}

pub fn call(callee: &str, args: Vec<Value>, ty: Option<Value>) -> Value {
    let mut v = json!({"kind": "call", "func": global(callee), "args": args});
    if let Some(ty) = ty {
        v["ty"] = ty;
    }
    v
}

pub fn instantiate(name: &str, type_args: Vec<Value>) -> Value {
    json!({"kind": "instantiate", "name": name, "type_args": type_args})
}

pub fn composite(ty: Value) -> Value {
    json!({"kind": "composite", "ty": ty})
}

pub fn at(mut v: Value, line: u32, col: u32) -> Value {
    v["pos"] = json!({"line": line, "col": col});
    v
}

// Inspection.

pub fn decl_names(file: &SourceFile) -> Vec<String> {
    file.decls.iter().map(Decl::display_name).collect()
}

pub fn funcs_with_prefix<'a>(file: &'a SourceFile, prefix: &str) -> Vec<&'a FuncDecl> {
    file.decls
        .iter()
        .filter_map(|d| match d {
            Decl::Func(f) if f.receiver.is_none() && f.name.starts_with(prefix) => Some(f),
            _ => None,
        })
        .collect()
}

pub fn func_named<'a>(file: &'a SourceFile, name: &str) -> &'a FuncDecl {
    file.decls
        .iter()
        .find_map(|d| match d {
            Decl::Func(f) if f.receiver.is_none() && f.name == name => Some(f),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no function {name:?}"))
}

/// Canonical JSON value of the file, for text-level searches.
pub fn as_value(file: &SourceFile) -> Value {
    serde_json::to_value(file).expect("encode tree")
}

/// Every callee name of a direct call in `body`, depth first.
pub fn callees(v: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_callees(v, &mut out);
    out
}

fn collect_callees(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            if map.get("kind").and_then(Value::as_str) == Some("call") {
                if let Some(name) = map
                    .get("func")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                {
                    out.push(name.to_string());
                }
            }
            for child in map.values() {
                collect_callees(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_callees(item, out);
            }
        }
        _ => {}
    }
}

/// True when any object in `v` has `"kind": kind`.
pub fn contains_kind(v: &Value, kind: &str) -> bool {
    match v {
        Value::Object(map) => {
            map.get("kind").and_then(Value::as_str) == Some(kind)
                || map.values().any(|c| contains_kind(c, kind))
        }
        Value::Array(items) => items.iter().any(|c| contains_kind(c, kind)),
        _ => false,
    }
}

//! Optional user-defined scripting backend for `AnonType::Script`.
//!
//! Gated behind the `scripting` feature. `rhai` is a real, maintained,
//! pure-Rust embeddable engine chosen because it needs no C toolchain at
//! build time for this optional, off-by-default feature — see DESIGN.md.

use anyhow::{Context, Result};
use rhai::{Engine, Scope, AST};

/// Loads a script module once and dispatches named single-argument
/// functions to it. Not reentrant: a script function must not call back
/// into the anonymizer (see concurrency model).
pub struct ScriptEngine {
    engine: Engine,
    ast: AST,
}

impl ScriptEngine {
    /// Compile the module at `dir`/`module` (a `.rhai` file, module name
    /// without extension). Called once, lazily, on first `Script` field use.
    /// `secret` is baked into the `get_secret()` helper at load time, since
    /// the configuration is read-only for the rest of the pipeline's
    /// lifetime anyway.
    pub fn load(dir: &std::path::Path, module: &str, secret: &[u8]) -> Result<Self> {
        let mut path = dir.join(module);
        path.set_extension("rhai");
        let mut engine = Engine::new();

        let secret_text = String::from_utf8_lossy(secret).into_owned();
        engine.register_fn("get_secret", move || secret_text.clone());
        engine.register_fn("sql_escape", |s: &str| sql_escape(s));
        engine.register_fn("sql_unescape", |s: &str| sql_unescape(s));

        let ast = engine
            .compile_file(path.clone())
            .with_context(|| format!("compile script module: {}", path.display()))?;
        Ok(ScriptEngine { engine, ast })
    }

    /// Call `function(token: string) -> string`. On any script error,
    /// returns an empty string rather than propagating — matching the
    /// original tool's scripting backend, which silently returns empty on
    /// interpreter error rather than aborting the whole dump.
    pub fn call(&self, function: &str, token: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(token).into_owned();
        let mut scope = Scope::new();

        let result: Result<String, _> =
            self.engine
                .call_fn(&mut scope, &self.ast, function, (text,));
        match result {
            Ok(s) => s.into_bytes(),
            Err(_) => Vec::new(),
        }
    }
}

/// Double every single-quote and every backslash, for scripts that need to
/// produce a safely-quotable SQL string literal.
pub fn sql_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch == '\'' || ch == '\\' {
            out.push(ch);
        }
        out.push(ch);
    }
    out
}

/// Reverse of [`sql_escape`]: collapse `''` and `\\` back to a single quote
/// or backslash respectively.
pub fn sql_unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if (ch == '\'' || ch == '\\') && chars.peek() == Some(&ch) {
            chars.next();
        }
        out.push(ch);
    }
    out
}

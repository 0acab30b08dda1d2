//! Names visible to handlers.
//!
//! Isolated handlers see exactly [`SAFE_GLOBALS`] as parameters, the
//! [`SHADOWED`] names bound to `undefined`, and nothing else from the
//! interpreter's global object beyond [`ISOLATION_KEEP`].

/// Built-ins passed to every isolated handler, in parameter order.
///
/// Names the interpreter does not provide arrive as `undefined`.
pub const SAFE_GLOBALS: &[&str] = &[
    "Object",
    "Array",
    "String",
    "Number",
    "Boolean",
    "Date",
    "RegExp",
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "JSON",
    "Math",
    "Map",
    "Set",
    "WeakMap",
    "WeakSet",
    "ArrayBuffer",
    "DataView",
    "Int8Array",
    "Uint8Array",
    "Uint8ClampedArray",
    "Int16Array",
    "Uint16Array",
    "Int32Array",
    "Uint32Array",
    "Float32Array",
    "Float64Array",
    "BigInt64Array",
    "BigUint64Array",
    "TextEncoder",
    "TextDecoder",
    "URL",
    "URLSearchParams",
    "console",
    "Promise",
];

/// Host-reaching names that resolve to `undefined` inside a handler.
pub const SHADOWED: &[&str] = &["process", "require", "global", "globalThis", "eval", "Function"];

/// Global-object properties that survive isolation besides
/// [`SAFE_GLOBALS`]. These are value-level helpers with no host reach.
pub const ISOLATION_KEEP: &[&str] = &[
    "undefined",
    "NaN",
    "Infinity",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURI",
    "encodeURIComponent",
    "decodeURI",
    "decodeURIComponent",
    "Symbol",
];

/// Script that installs a `console` whose methods discard their input.
pub(crate) const SILENT_CONSOLE: &str = r#"
var console = (function () {
    var noop = function () {};
    return { log: noop, info: noop, warn: noop, error: noop, debug: noop, trace: noop };
})();
"#;

/// Script that deletes every global not named in `keep`.
pub(crate) fn isolation_prelude() -> String {
    let keep: Vec<String> = SAFE_GLOBALS
        .iter()
        .chain(ISOLATION_KEEP)
        .map(|name| format!("{name:?}"))
        .collect();
    format!(
        r#"
(function (g) {{
    var keep = [{keep}];
    var names = Object.getOwnPropertyNames(g);
    for (var i = 0; i < names.length; i++) {{
        if (keep.indexOf(names[i]) === -1) {{
            try {{ delete g[names[i]]; }} catch (e) {{}}
        }}
    }}
}})(this);
"#,
        keep = keep.join(", ")
    )
}

/// Argument list expression handing each safe global to a handler.
pub(crate) fn safe_global_arguments() -> String {
    SAFE_GLOBALS
        .iter()
        .map(|name| format!("typeof {name} === 'undefined' ? undefined : {name}"))
        .collect::<Vec<_>>()
        .join(",\n        ")
}

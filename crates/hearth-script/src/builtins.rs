//! Pure helpers available to scripts: `Math`, `JSON`, `Object`, conversions,
//! and the string and array methods.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::ScriptError;
use crate::value::{compare, display, number, strict_eq, to_number, type_of};

/// Array methods that modify the receiver in place.
pub const MUTATING_METHODS: &[&str] = &["push", "pop", "shift", "unshift", "reverse", "sort"];

/// Array methods that would need a callback argument.
const CALLBACK_METHODS: &[&str] = &["map", "filter", "forEach", "find", "some", "every", "reduce"];

fn type_error(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError::Type {
        line,
        message: message.into(),
    }
}

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&Value::Null)
}

fn num_arg(args: &[Value], i: usize) -> f64 {
    to_number(arg(args, i))
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
fn relative_index(n: f64, len: usize) -> usize {
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        len.saturating_sub((-n) as usize)
    } else {
        (n as usize).min(len)
    }
}

pub fn math_constant(name: &str) -> Option<Value> {
    Some(match name {
        "PI" => number(std::f64::consts::PI),
        "E" => number(std::f64::consts::E),
        _ => return None,
    })
}

pub fn math(name: &str, args: &[Value], line: usize) -> Result<Value, ScriptError> {
    let x = num_arg(args, 0);
    let result = match name {
        "abs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "sign" => {
            if x == 0.0 || x.is_nan() {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "pow" => x.powf(num_arg(args, 1)),
        "hypot" => args.iter().map(to_number).map(|v| v * v).sum::<f64>().sqrt(),
        "min" => args.iter().map(to_number).fold(f64::INFINITY, f64::min),
        "max" => args.iter().map(to_number).fold(f64::NEG_INFINITY, f64::max),
        "random" => rand::random::<f64>(),
        other => return Err(type_error(line, format!("Math.{other} is not a function"))),
    };
    Ok(number(result))
}

/// `JSON.*`, `Object.*` and `Array.*` helpers.
pub fn namespaced(namespace: &str, name: &str, args: &[Value], line: usize) -> Option<Result<Value, ScriptError>> {
    let value = arg(args, 0);
    let result = match (namespace, name) {
        ("Math", _) => return Some(math(name, args, line)),
        ("JSON", "stringify") => Ok(Value::String(value.to_string())),
        ("JSON", "parse") => serde_json::from_str::<Value>(&display(value))
            .map_err(|e| ScriptError::Syntax {
                line,
                message: format!("JSON.parse: {e}"),
            }),
        ("Object", "keys") => Ok(match value {
            Value::Object(map) => map.keys().cloned().map(Value::String).collect(),
            Value::Array(items) => (0..items.len()).map(|i| Value::String(i.to_string())).collect(),
            _ => Value::Array(Vec::new()),
        }),
        ("Object", "values") => Ok(match value {
            Value::Object(map) => map.values().cloned().collect(),
            Value::Array(items) => Value::Array(items.clone()),
            _ => Value::Array(Vec::new()),
        }),
        ("Object", "entries") => Ok(match value {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                .collect(),
            _ => Value::Array(Vec::new()),
        }),
        ("Array", "isArray") => Ok(Value::Bool(value.is_array())),
        _ => return None,
    };
    Some(result)
}

/// Free functions: conversions and the `Error` constructor.
pub fn global_function(name: &str, args: &[Value]) -> Option<Value> {
    let value = arg(args, 0);
    Some(match name {
        "String" => Value::String(display(value)),
        "Number" => number(to_number(value)),
        "Boolean" => Value::Bool(crate::value::truthy(value)),
        "parseInt" => {
            let text = display(value);
            let digits: String = text
                .trim()
                .chars()
                .enumerate()
                .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
                .map(|(_, c)| c)
                .collect();
            digits.parse::<f64>().map_or(Value::Null, number)
        }
        "parseFloat" => number(to_number(&Value::String(display(value)))),
        "isNaN" => Value::Bool(to_number(value).is_nan()),
        "Error" => {
            let mut map = Map::new();
            map.insert("name".into(), Value::String("Error".into()));
            map.insert("message".into(), Value::String(display(value)));
            Value::Object(map)
        }
        _ => return None,
    })
}

/// Read `object.name`.
pub fn property(object: &Value, name: &str, optional: bool, line: usize) -> Result<Value, ScriptError> {
    match object {
        Value::Null if optional => Ok(Value::Null),
        Value::Null => Err(type_error(
            line,
            format!("Cannot read properties of undefined (reading '{name}')"),
        )),
        Value::String(s) if name == "length" => Ok(Value::from(s.chars().count())),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

/// Read `object[index]`.
pub fn index(object: &Value, index: &Value, line: usize) -> Result<Value, ScriptError> {
    match (object, index) {
        (Value::Array(items), Value::Number(_)) => {
            let i = to_number(index);
            if i < 0.0 || i.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::String(s), Value::Number(_)) => {
            let i = to_number(index);
            if i < 0.0 || i.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(s.chars()
                .nth(i as usize)
                .map_or(Value::Null, |c| Value::String(c.to_string())))
        }
        (Value::Null, _) => Err(type_error(
            line,
            format!("Cannot read properties of undefined (reading '{}')", display(index)),
        )),
        (other, key) => property(other, &display(key), false, line),
    }
}

fn sort_values(items: &mut [Value]) {
    items.sort_by(|a, b| {
        if a.is_number() && b.is_number() {
            compare(a, b).unwrap_or(Ordering::Equal)
        } else {
            display(a).cmp(&display(b))
        }
    });
}

/// Run a mutating array method. `None` if `name` is not one.
pub fn mutating_method(
    target: &mut Value,
    name: &str,
    args: &[Value],
    line: usize,
) -> Option<Result<Value, ScriptError>> {
    if !MUTATING_METHODS.contains(&name) {
        return None;
    }
    let Value::Array(items) = target else {
        return Some(Err(type_error(
            line,
            format!("{name} is not a function on a {}", type_of(target)),
        )));
    };
    let result = match name {
        "push" => {
            items.extend(args.iter().cloned());
            Value::from(items.len())
        }
        "pop" => items.pop().unwrap_or(Value::Null),
        "shift" => {
            if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            }
        }
        "unshift" => {
            for (i, value) in args.iter().enumerate() {
                items.insert(i, value.clone());
            }
            Value::from(items.len())
        }
        "reverse" => {
            items.reverse();
            Value::Array(items.clone())
        }
        _ => {
            sort_values(items);
            Value::Array(items.clone())
        }
    };
    Some(Ok(result))
}

/// Methods that leave the receiver alone.
pub fn method(receiver: &Value, name: &str, args: &[Value], line: usize) -> Result<Value, ScriptError> {
    if CALLBACK_METHODS.contains(&name) {
        return Err(type_error(
            line,
            format!("{name}() with a callback is not supported; use a for..of loop"),
        ));
    }
    match (receiver, name) {
        (_, "toString") => Ok(Value::String(display(receiver))),
        (Value::Number(_), "toFixed") => {
            let digits = num_arg(args, 0).clamp(0.0, 20.0) as usize;
            Ok(Value::String(format!("{:.*}", digits, to_number(receiver))))
        }
        (Value::Array(items), _) => array_method(items, name, args, line),
        (Value::String(s), _) => string_method(s, name, args, line),
        (Value::Null, _) => Err(type_error(
            line,
            format!("Cannot read properties of undefined (reading '{name}')"),
        )),
        (other, _) => Err(type_error(
            line,
            format!("{name} is not a function on a {}", type_of(other)),
        )),
    }
}

fn array_method(items: &[Value], name: &str, args: &[Value], line: usize) -> Result<Value, ScriptError> {
    let needle = arg(args, 0);
    Ok(match name {
        "includes" => Value::Bool(items.iter().any(|v| strict_eq(v, needle))),
        "indexOf" => number(
            items
                .iter()
                .position(|v| strict_eq(v, needle))
                .map_or(-1.0, |i| i as f64),
        ),
        "join" => {
            let sep = if args.is_empty() {
                ",".to_string()
            } else {
                display(needle)
            };
            Value::String(items.iter().map(display).collect::<Vec<_>>().join(&sep))
        }
        "slice" => {
            let start = relative_index(num_arg(args, 0), items.len());
            let end = if args.len() > 1 {
                relative_index(num_arg(args, 1), items.len())
            } else {
                items.len()
            };
            Value::Array(items.get(start..end.max(start)).unwrap_or_default().to_vec())
        }
        "concat" => {
            let mut out = items.to_vec();
            for value in args {
                match value {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        "at" => {
            let n = num_arg(args, 0);
            let i = if n < 0.0 { items.len() as f64 + n } else { n };
            if i < 0.0 {
                Value::Null
            } else {
                items.get(i as usize).cloned().unwrap_or(Value::Null)
            }
        }
        other => return Err(type_error(line, format!("array.{other} is not a function"))),
    })
}

fn string_method(s: &str, name: &str, args: &[Value], line: usize) -> Result<Value, ScriptError> {
    let first = display(arg(args, 0));
    Ok(match name {
        "includes" => Value::Bool(s.contains(&first)),
        "startsWith" => Value::Bool(s.starts_with(&first)),
        "endsWith" => Value::Bool(s.ends_with(&first)),
        "indexOf" => number(
            s.find(&first)
                .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "toUpperCase" => Value::String(s.to_uppercase()),
        "trim" => Value::String(s.trim().to_string()),
        "split" => {
            let parts: Vec<Value> = if first.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(first.as_str()).map(|p| Value::String(p.to_string())).collect()
            };
            Value::Array(parts)
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = relative_index(num_arg(args, 0), chars.len());
            let end = if args.len() > 1 {
                relative_index(num_arg(args, 1), chars.len())
            } else {
                chars.len()
            };
            Value::String(chars.get(start..end.max(start)).unwrap_or_default().iter().collect())
        }
        "replace" => Value::String(s.replacen(&first, &display(arg(args, 1)), 1)),
        other => return Err(type_error(line, format!("string.{other} is not a function"))),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn math_helpers() {
        assert_eq!(math("max", &[json!(3), json!(9), json!(-1)], 1).unwrap(), json!(9));
        assert_eq!(math("round", &[json!(2.5)], 1).unwrap(), json!(3));
        assert_eq!(math("floor", &[json!(-0.5)], 1).unwrap(), json!(-1));
        let r = to_number(&math("random", &[], 1).unwrap());
        assert!((0.0..1.0).contains(&r));
        assert!(math("cbrt", &[], 4).is_err());
    }

    #[test]
    fn push_and_pop_mutate_arrays() {
        let mut list = json!(["a"]);
        assert_eq!(mutating_method(&mut list, "push", &[json!("b"), json!("c")], 1).unwrap().unwrap(), json!(3));
        assert_eq!(mutating_method(&mut list, "pop", &[], 1).unwrap().unwrap(), json!("c"));
        assert_eq!(list, json!(["a", "b"]));
        assert!(mutating_method(&mut list, "join", &[], 1).is_none());
        assert!(mutating_method(&mut json!("text"), "push", &[], 1).unwrap().is_err());
    }

    #[test]
    fn read_only_methods() {
        let list = json!(["oak_log", "dirt", "stone"]);
        assert_eq!(method(&list, "includes", &[json!("dirt")], 1).unwrap(), json!(true));
        assert_eq!(method(&list, "slice", &[json!(-2)], 1).unwrap(), json!(["dirt", "stone"]));
        assert_eq!(method(&list, "join", &[json!(" ")], 1).unwrap(), json!("oak_log dirt stone"));
        assert_eq!(method(&json!("oak_log"), "split", &[json!("_")], 1).unwrap(), json!(["oak", "log"]));
        assert_eq!(method(&json!(2.456), "toFixed", &[json!(1)], 1).unwrap(), json!("2.5"));
        assert!(method(&list, "map", &[], 3).is_err());
    }

    #[test]
    fn property_reads() {
        assert_eq!(property(&json!([1, 2]), "length", false, 1).unwrap(), json!(2));
        assert_eq!(property(&json!({"x": 4}), "y", false, 1).unwrap(), Value::Null);
        assert_eq!(property(&Value::Null, "y", true, 1).unwrap(), Value::Null);
        assert!(property(&Value::Null, "y", false, 1).is_err());
        assert_eq!(index(&json!(["a", "b"]), &json!(1), 1).unwrap(), json!("b"));
        assert_eq!(index(&json!({"k": true}), &json!("k"), 1).unwrap(), json!(true));
    }
}

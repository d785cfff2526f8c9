//! Lazy evaluation of a parsed filter over `serde_json::Value`.
//!
//! Every expression yields a boxed stream of results. Pipes, commas and
//! iteration are lazy, so an error surfaces only when the consumer reaches
//! it; results already pulled stay emitted. Operators that need all of an
//! operand's results (comparisons, `//`, array construction) collect that
//! operand first.

use std::cmp::Ordering;
use std::iter;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::parser::{Builtin, CompareOp, Expr};
use super::FilterError;

pub(crate) type Stream<'a> = Box<dyn Iterator<Item = Result<Value, FilterError>> + 'a>;

fn one<'a>(value: Value) -> Stream<'a> {
    Box::new(iter::once(Ok(value)))
}

fn raise<'a>(error: FilterError) -> Stream<'a> {
    Box::new(iter::once(Err(error)))
}

fn fail<'a>(message: String) -> Stream<'a> {
    raise(FilterError::Eval(message))
}

/// Defer building a stream until it is first polled.
fn lazy<'a>(build: impl FnOnce() -> Stream<'a> + 'a) -> Stream<'a> {
    Box::new(iter::once_with(build).flatten())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

impl Expr {
    pub(crate) fn run<'a>(&'a self, input: Value) -> Stream<'a> {
        match self {
            Expr::Identity => one(input),
            Expr::Literal(value) => one(value.clone()),
            Expr::Pipe(lhs, rhs) => {
                let rhs = &**rhs;
                Box::new(lhs.run(input).flat_map(move |res| -> Stream<'a> {
                    match res {
                        Ok(value) => rhs.run(value),
                        Err(e) => raise(e),
                    }
                }))
            }
            Expr::Comma(lhs, rhs) => {
                let rhs = &**rhs;
                let first = lhs.run(input.clone());
                Box::new(first.chain(lazy(move || rhs.run(input))))
            }
            Expr::Index(target, index) => {
                let index = &**index;
                Box::new(target.run(input.clone()).flat_map(move |res| -> Stream<'a> {
                    match res {
                        Ok(container) => Box::new(
                            index
                                .run(input.clone())
                                .map(move |key| key.and_then(|key| index_value(&container, &key))),
                        ),
                        Err(e) => raise(e),
                    }
                }))
            }
            Expr::Slice(target, from, to) => {
                let bounds = |bound: &Option<Box<Expr>>| match bound {
                    Some(expr) => collect(expr, input.clone()),
                    None => Ok(vec![Value::Null]),
                };
                let (from, to) = match (bounds(from), bounds(to)) {
                    (Ok(from), Ok(to)) => (from, to),
                    (Err(e), _) | (_, Err(e)) => return raise(e),
                };
                Box::new(target.run(input).flat_map(move |res| -> Stream<'a> {
                    let container = match res {
                        Ok(container) => container,
                        Err(e) => return raise(e),
                    };
                    let mut out = Vec::with_capacity(from.len() * to.len());
                    for end in &to {
                        for start in &from {
                            out.push(slice_value(&container, start, end));
                        }
                    }
                    Box::new(out.into_iter())
                }))
            }
            Expr::Iterate(target) => Box::new(target.run(input).flat_map(|res| -> Stream<'a> {
                match res {
                    Ok(value) => iterate(value),
                    Err(e) => raise(e),
                }
            })),
            Expr::Try(inner) => Box::new(inner.run(input).map_while(Result::ok).map(Ok)),
            Expr::Alt(lhs, rhs) => {
                let kept: Vec<Value> = lhs.run(input.clone()).filter_map(Result::ok).filter(truthy).collect();
                if kept.is_empty() {
                    rhs.run(input)
                } else {
                    Box::new(kept.into_iter().map(Ok))
                }
            }
            Expr::And(lhs, rhs) => logical(lhs, rhs, input, false),
            Expr::Or(lhs, rhs) => logical(lhs, rhs, input, true),
            Expr::Compare(op, lhs, rhs) => {
                let op = *op;
                let right = match collect(rhs, input.clone()) {
                    Ok(values) => values,
                    Err(e) => return raise(e),
                };
                let left = match collect(lhs, input) {
                    Ok(values) => values,
                    Err(e) => return raise(e),
                };
                let mut out = Vec::with_capacity(left.len() * right.len());
                for r in &right {
                    for l in &left {
                        out.push(Ok(Value::Bool(compare_op(op, l, r))));
                    }
                }
                Box::new(out.into_iter())
            }
            Expr::Array(None) => one(Value::Array(Vec::new())),
            Expr::Array(Some(inner)) => match collect(inner, input) {
                Ok(items) => one(Value::Array(items)),
                Err(e) => raise(e),
            },
            Expr::Object(entries) => match build_objects(entries, &input) {
                Ok(objects) => Box::new(objects.into_iter().map(|o| Ok(Value::Object(o)))),
                Err(e) => raise(e),
            },
            Expr::Template(parts) => {
                // earlier parts vary fastest
                let mut texts = vec![String::new()];
                for part in parts {
                    let values = match collect(part, input.clone()) {
                        Ok(values) => values,
                        Err(e) => return raise(e),
                    };
                    texts = values
                        .iter()
                        .flat_map(|value| {
                            let piece = stringify(value);
                            texts.iter().map(move |text| format!("{text}{piece}"))
                        })
                        .collect();
                }
                Box::new(texts.into_iter().map(|text| Ok(Value::String(text))))
            }
            Expr::Call(builtin, args) => call(*builtin, args, input),
        }
    }
}

/// `and` / `or`: short-circuits on each left result.
fn logical<'a>(lhs: &'a Expr, rhs: &'a Expr, input: Value, is_or: bool) -> Stream<'a> {
    Box::new(lhs.run(input.clone()).flat_map(move |res| -> Stream<'a> {
        match res {
            Ok(l) if truthy(&l) == is_or => one(Value::Bool(is_or)),
            Ok(_) => Box::new(rhs.run(input.clone()).map(|r| r.map(|r| Value::Bool(truthy(&r))))),
            Err(e) => raise(e),
        }
    }))
}

fn collect(expr: &Expr, input: Value) -> Result<Vec<Value>, FilterError> {
    expr.run(input).collect()
}

fn index_value(container: &Value, key: &Value) -> Result<Value, FilterError> {
    match (container, key) {
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(n)) => {
            let Some(i) = n.as_f64().map(|f| f.floor() as i64) else {
                return Ok(Value::Null);
            };
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            Ok(usize::try_from(i).ok().and_then(|i| items.get(i)).cloned().unwrap_or(Value::Null))
        }
        (Value::Null, Value::String(_) | Value::Number(_)) => Ok(Value::Null),
        (c, k) => Err(FilterError::Eval(format!("cannot index {} with {}", type_name(c), type_name(k)))),
    }
}

/// `[from:to]` over an array or string; negative bounds count from the end
/// and out-of-range bounds are clamped.
fn slice_value(container: &Value, from: &Value, to: &Value) -> Result<Value, FilterError> {
    match container {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let (start, end) = slice_range(items.len(), from, to)?;
            Ok(Value::Array(items[start..end].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_range(chars.len(), from, to)?;
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        other => Err(FilterError::Eval(format!("cannot slice {}", type_name(other)))),
    }
}

fn slice_range(len: usize, from: &Value, to: &Value) -> Result<(usize, usize), FilterError> {
    let bound = |value: &Value, default: usize, round: fn(f64) -> f64| match value {
        Value::Null => Ok(default),
        Value::Number(n) => {
            let len = len as f64;
            let i = round(n.as_f64().unwrap_or(0.0));
            let i = if i < 0.0 { len + i } else { i };
            Ok(i.clamp(0.0, len) as usize)
        }
        other => Err(FilterError::Eval(format!("cannot slice with {}", type_name(other)))),
    };
    let start = bound(from, 0, f64::floor)?;
    let end = bound(to, len, f64::ceil)?;
    Ok((start, end.max(start)))
}

/// Strings as-is, everything else as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn iterate<'a>(value: Value) -> Stream<'a> {
    match value {
        Value::Array(items) => Box::new(items.into_iter().map(Ok)),
        Value::Object(map) => Box::new(map.into_iter().map(|(_, v)| Ok(v))),
        other => fail(format!("cannot iterate over {}", type_name(&other))),
    }
}

/// Cartesian product of every entry's results, in entry order.
fn build_objects(entries: &[(String, Expr)], input: &Value) -> Result<Vec<Map<String, Value>>, FilterError> {
    let mut objects = vec![Map::new()];
    for (key, expr) in entries {
        let values = collect(expr, input.clone())?;
        let mut next = Vec::with_capacity(objects.len() * values.len());
        for object in &objects {
            for value in &values {
                let mut extended = object.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        objects = next;
    }
    Ok(objects)
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order: null < false < true < numbers < strings < arrays < objects.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => {
            let keys = x.keys().cmp(y.keys());
            if keys.is_ne() {
                return keys;
            }
            x.values()
                .zip(y.values())
                .map(|(a, b)| compare_values(a, b))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_op(op: CompareOp, l: &Value, r: &Value) -> bool {
    let ord = compare_values(l, r);
    match op {
        CompareOp::Eq => ord.is_eq(),
        CompareOp::Ne => ord.is_ne(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Le => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Ge => ord.is_ge(),
    }
}

fn add_values(acc: Value, next: Value) -> Result<Value, FilterError> {
    match (acc, next) {
        (Value::Null, v) | (v, Value::Null) => Ok(v),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) if a.checked_add(b).is_some() => Ok(Value::from(a + b)),
            _ => {
                let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
                Ok(serde_json::Number::from_f64(sum).map_or(Value::Null, Value::Number))
            }
        },
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Ok(Value::Object(a))
        }
        (a, b) => Err(FilterError::Eval(format!(
            "{} and {} cannot be added",
            type_name(&a),
            type_name(&b)
        ))),
    }
}

fn to_entries(input: Value) -> Result<Value, FilterError> {
    match input {
        Value::Object(map) => Ok(Value::Array(
            map.into_iter()
                .map(|(key, value)| {
                    let mut entry = Map::new();
                    entry.insert("key".to_string(), Value::String(key));
                    entry.insert("value".to_string(), value);
                    Value::Object(entry)
                })
                .collect(),
        )),
        other => Err(FilterError::Eval(format!("{} has no entries", type_name(&other)))),
    }
}

/// Accepts `key`/`k`/`name` and `value`/`v` entry fields, like jq.
fn from_entries(input: Value) -> Result<Value, FilterError> {
    let entries = match input {
        Value::Array(entries) => entries,
        other => return Err(FilterError::Eval(format!("cannot build an object from {}", type_name(&other)))),
    };
    let mut map = Map::new();
    for entry in entries {
        let mut entry = match entry {
            Value::Object(entry) => entry,
            other => return Err(FilterError::Eval(format!("entry must be an object, not {}", type_name(&other)))),
        };
        let key = ["key", "k", "name", "Key", "K", "Name"]
            .iter()
            .find_map(|field| entry.remove(*field).filter(|v| !v.is_null()));
        let key = match key {
            Some(Value::String(key)) => key,
            Some(key @ (Value::Number(_) | Value::Bool(_))) => key.to_string(),
            Some(other) => return Err(FilterError::Eval(format!("entry key cannot be {}", type_name(&other)))),
            None => return Err(FilterError::Eval("entry has no key".to_string())),
        };
        let value = ["value", "v", "Value", "V"]
            .iter()
            .find_map(|field| entry.remove(*field))
            .unwrap_or(Value::Null);
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}

fn sortable(input: Value) -> Result<Vec<Value>, FilterError> {
    match input {
        Value::Array(items) => Ok(items),
        other => Err(FilterError::Eval(format!("{} cannot be sorted, as it is not an array", type_name(&other)))),
    }
}

fn has(container: &Value, key: &Value) -> Result<bool, FilterError> {
    match (container, key) {
        (Value::Object(map), Value::String(k)) => Ok(map.contains_key(k)),
        (Value::Array(items), Value::Number(n)) => Ok(n.as_f64().is_some_and(|i| i >= 0.0 && i < items.len() as f64)),
        (c, k) => Err(FilterError::Eval(format!("cannot check whether {} has a {} key", type_name(c), type_name(k)))),
    }
}

fn join(input: &Value, separator: &Value) -> Result<Value, FilterError> {
    let Value::String(separator) = separator else {
        return Err(FilterError::Eval(format!("cannot join with {}", type_name(separator))));
    };
    let Value::Array(items) = input else {
        return Err(FilterError::Eval(format!("cannot join {}", type_name(input))));
    };
    let mut pieces = Vec::with_capacity(items.len());
    for item in items {
        pieces.push(match item {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => item.to_string(),
            other => return Err(FilterError::Eval(format!("cannot join {}", type_name(other)))),
        });
    }
    Ok(Value::String(pieces.join(separator.as_str())))
}

/// `test(re)` / `test(re; flags)`. Flags: `i` ignore case, `x` extended,
/// `s` single line; `g` is accepted and has no effect.
fn regex_test(input: &Value, pattern: &Value, flags: &Value) -> Result<Value, FilterError> {
    let Value::String(text) = input else {
        return Err(FilterError::Eval(format!("{} cannot be matched, as it is not a string", type_name(input))));
    };
    let Value::String(pattern) = pattern else {
        return Err(FilterError::Eval(format!("regex must be a string, not {}", type_name(pattern))));
    };
    let mut builder = RegexBuilder::new(pattern);
    match flags {
        Value::Null => {}
        Value::String(flags) => {
            for flag in flags.chars() {
                match flag {
                    'i' => builder.case_insensitive(true),
                    'x' => builder.ignore_whitespace(true),
                    's' => builder.dot_matches_new_line(true),
                    'g' => &mut builder,
                    other => return Err(FilterError::Eval(format!("{other} is not a valid regex flag"))),
                };
            }
        }
        other => return Err(FilterError::Eval(format!("regex flags cannot be {}", type_name(other)))),
    }
    let regex = builder
        .build()
        .map_err(|e| FilterError::Eval(format!("invalid regex {pattern:?}: {e}")))?;
    Ok(Value::Bool(regex.is_match(text)))
}

fn done<'a>(result: Result<Value, FilterError>) -> Stream<'a> {
    match result {
        Ok(value) => one(value),
        Err(e) => raise(e),
    }
}

/// Run `f` on `input` for every result of `arg`.
fn with_arg<'a>(
    arg: &'a Expr,
    input: Value,
    f: impl Fn(&Value, &Value) -> Result<Value, FilterError> + 'a,
) -> Stream<'a> {
    Box::new(arg.run(input.clone()).map(move |res| res.and_then(|a| f(&input, &a))))
}

fn call<'a>(builtin: Builtin, args: &'a [Expr], input: Value) -> Stream<'a> {
    match builtin {
        Builtin::Empty => Box::new(iter::empty()),
        Builtin::Type => one(Value::String(type_name(&input).to_string())),
        Builtin::Not => one(Value::Bool(!truthy(&input))),
        Builtin::Length => match &input {
            Value::Null => one(Value::from(0)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => one(Value::from(i.unsigned_abs())),
                None => one(serde_json::Number::from_f64(n.as_f64().unwrap_or(0.0).abs()).map_or(Value::Null, Value::Number)),
            },
            Value::String(s) => one(Value::from(s.chars().count())),
            Value::Array(items) => one(Value::from(items.len())),
            Value::Object(map) => one(Value::from(map.len())),
            Value::Bool(_) => fail("boolean has no length".to_string()),
        },
        Builtin::Keys => match &input {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                one(Value::Array(keys.into_iter().map(|k| Value::String(k.clone())).collect()))
            }
            Value::Array(items) => one(Value::Array((0..items.len()).map(Value::from).collect())),
            other => fail(format!("{} has no keys", type_name(other))),
        },
        Builtin::Add => match input {
            Value::Array(items) => match items.into_iter().try_fold(Value::Null, add_values) {
                Ok(sum) => one(sum),
                Err(e) => raise(e),
            },
            Value::Null => one(Value::Null),
            other => fail(format!("cannot add the elements of {}", type_name(&other))),
        },
        Builtin::Select => {
            let predicate = &args[0];
            Box::new(predicate.run(input.clone()).filter_map(move |res| match res {
                Ok(v) if truthy(&v) => Some(Ok(input.clone())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }))
        }
        Builtin::Map => {
            let mapper = &args[0];
            let mapped: Result<Vec<Value>, FilterError> = iterate(input)
                .flat_map(|res| -> Stream<'a> {
                    match res {
                        Ok(v) => mapper.run(v),
                        Err(e) => raise(e),
                    }
                })
                .collect();
            match mapped {
                Ok(items) => one(Value::Array(items)),
                Err(e) => raise(e),
            }
        }
        Builtin::ToEntries => done(to_entries(input)),
        Builtin::FromEntries => done(from_entries(input)),
        Builtin::WithEntries => {
            let mapper = &args[0];
            let entries = match to_entries(input) {
                Ok(Value::Array(entries)) => entries,
                Ok(_) => Vec::new(),
                Err(e) => return raise(e),
            };
            let mut mapped = Vec::new();
            for entry in entries {
                match collect(mapper, entry) {
                    Ok(results) => mapped.extend(results),
                    Err(e) => return raise(e),
                }
            }
            done(from_entries(Value::Array(mapped)))
        }
        Builtin::Sort => done(sortable(input).map(|mut items| {
            items.sort_by(compare_values);
            Value::Array(items)
        })),
        Builtin::SortBy => {
            let key = &args[0];
            let keyed: Result<Vec<(Value, Value)>, FilterError> = sortable(input).and_then(|items| {
                items
                    .into_iter()
                    .map(|item| -> Result<(Value, Value), FilterError> {
                        Ok((Value::Array(collect(key, item.clone())?), item))
                    })
                    .collect()
            });
            done(keyed.map(|mut keyed| {
                keyed.sort_by(|(a, _), (b, _)| compare_values(a, b));
                Value::Array(keyed.into_iter().map(|(_, item)| item).collect())
            }))
        }
        Builtin::Has => with_arg(&args[0], input, |container, key| has(container, key).map(Value::Bool)),
        Builtin::Join => with_arg(&args[0], input, join),
        Builtin::ToString => one(Value::String(stringify(&input))),
        Builtin::Test => {
            let flags = match args.get(1).map(|f| collect(f, input.clone())).transpose() {
                Ok(flags) => flags.unwrap_or_else(|| vec![Value::Null]),
                Err(e) => return raise(e),
            };
            Box::new(args[0].run(input.clone()).flat_map(move |res| -> Stream<'a> {
                let pattern = match res {
                    Ok(pattern) => pattern,
                    Err(e) => return raise(e),
                };
                let results: Vec<_> = flags.iter().map(|flags| regex_test(&input, &pattern, flags)).collect();
                Box::new(results.into_iter())
            }))
        }
    }
}

//! `str` methods, `str.format` and format-spec application.

use std::rc::Rc;

use super::fault::{exc, type_error, value_error, EvalResult, ExcKind};
use super::object::{Args, Object};
use super::subscript::Index;
use super::Interpreter;
use crate::pyfmt::{format_float, format_int, format_str, FormatSpec};

/// `format(value, spec)`.
pub(crate) fn format_value(value: &Object, spec: &str) -> EvalResult<String> {
    if spec.is_empty() {
        return value.try_str();
    }
    let parsed = FormatSpec::parse(spec).map_err(value_error)?;
    let formatted = match value {
        Object::Int(_) | Object::Bool(_) => format_int(value.as_int().unwrap_or_default(), &parsed),
        Object::Float(f) => format_float(*f, &parsed),
        Object::Str(s) => format_str(s, &parsed),
        other => {
            return Err(type_error(format!(
                "unsupported format string passed to {}.__format__",
                other.type_name()
            )))
        }
    };
    formatted.map_err(value_error)
}

/// Escape non-ASCII characters the way `ascii()` does.
pub(crate) fn ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        if code < 0x80 {
            out.push(c);
        } else if code < 0x100 {
            out.push_str(&format!("\\x{code:02x}"));
        } else if code < 0x10000 {
            out.push_str(&format!("\\u{code:04x}"));
        } else {
            out.push_str(&format!("\\U{code:08x}"));
        }
    }
    out
}

/// Byte range of the characters `start..end` (Python slice bounds) of
/// `text`, plus the character offset of its start.
fn window(text: &str, start: Option<i64>, end: Option<i64>) -> (usize, usize, usize) {
    let n = text.chars().count() as i64;
    let norm = |b: Option<i64>, default: i64| match b {
        None => default,
        Some(b) if b < 0 => (b + n).max(0),
        Some(b) => b.min(n),
    };
    let s = norm(start, 0);
    let e = norm(end, n).max(s);
    let byte = |chars: i64| {
        text.char_indices()
            .nth(chars as usize)
            .map_or(text.len(), |(i, _)| i)
    };
    (byte(s), byte(e), s as usize)
}

fn char_offset(text: &str, byte: usize) -> i64 {
    text[..byte].chars().count() as i64
}

fn pad_args(args: &Args, func: &str) -> EvalResult<(usize, char)> {
    args.expect(func, 1, 2)?;
    let width = usize::try_from(args.int_at(0, func)?).unwrap_or(0);
    let fill = match args.get(1) {
        None => ' ',
        Some(_) => {
            let fill = args.str_at(1, func)?;
            let mut chars = fill.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(type_error(
                        "The fill character must be exactly one character long",
                    ))
                }
            }
        }
    };
    Ok((width, fill))
}

fn fill(c: char, n: usize) -> String {
    std::iter::repeat(c).take(n).collect()
}

/// Affixes for `startswith`/`endswith`: one string or a tuple of them.
fn affixes(obj: &Object, func: &str) -> EvalResult<Vec<Rc<str>>> {
    match obj {
        Object::Str(s) => Ok(vec![s.clone()]),
        Object::Tuple(items) => items
            .iter()
            .map(|item| match item {
                Object::Str(s) => Ok(s.clone()),
                other => Err(type_error(format!(
                    "tuple for {func} must only contain str, not {}",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(type_error(format!(
            "{func} first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

fn strip_chars(args: &Args, func: &str) -> EvalResult<Option<Vec<char>>> {
    args.expect(func, 0, 1)?;
    match args.optional(0) {
        None => Ok(None),
        Some(_) => Ok(Some(args.str_at(0, func)?.chars().collect())),
    }
}

fn split_whitespace(text: &str, maxsplit: Option<usize>) -> Vec<Object> {
    let mut out = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| out.len() >= m) {
            out.push(Object::str_from(rest));
            return out;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(Object::str_from(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    out
}

fn rsplit_whitespace(text: &str, maxsplit: Option<usize>) -> Vec<Object> {
    let mut out = Vec::new();
    let mut rest = text.trim_end();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| out.len() >= m) {
            out.push(Object::str_from(rest));
            break;
        }
        let start = rest
            .rfind(char::is_whitespace)
            .map_or(0, |i| i + rest[i..].chars().next().map_or(1, char::len_utf8));
        out.push(Object::str_from(&rest[start..]));
        rest = rest[..start].trim_end();
    }
    out.reverse();
    out
}

fn split_args(args: &mut Args, func: &str) -> EvalResult<(Option<Rc<str>>, Option<usize>)> {
    args.keyword_to_positional("sep", 0);
    args.keyword_to_positional("maxsplit", 1);
    args.expect(func, 0, 2)?;
    let sep = match args.optional(0) {
        Some(_) => {
            let sep = args.str_at(0, func)?;
            if sep.is_empty() {
                return Err(value_error("empty separator"));
            }
            Some(sep)
        }
        None => None,
    };
    let maxsplit = args
        .opt_int_at(1, func)?
        .and_then(|m| usize::try_from(m).ok());
    Ok((sep, maxsplit))
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn is_title(text: &str) -> bool {
    let mut cased = false;
    let mut previous_cased = false;
    for c in text.chars() {
        if c.is_uppercase() {
            if previous_cased {
                return false;
            }
            previous_cased = true;
            cased = true;
        } else if c.is_lowercase() {
            if !previous_cased {
                return false;
            }
            previous_cased = true;
            cased = true;
        } else {
            previous_cased = false;
        }
    }
    cased
}

fn splitlines(text: &str, keepends: bool) -> Vec<Object> {
    let mut out = Vec::new();
    let mut line = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let is_break = matches!(
            c,
            '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
        );
        if !is_break {
            line.push(c);
            continue;
        }
        if keepends {
            line.push(c);
        }
        if c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
            if keepends {
                line.push('\n');
            }
        }
        out.push(Object::str_from(std::mem::take(&mut line)));
    }
    if !line.is_empty() {
        out.push(Object::str_from(line));
    }
    out
}

fn find_in(text: &str, args: &Args, func: &str, reverse: bool) -> EvalResult<i64> {
    args.expect(func, 1, 3)?;
    let needle = args.str_at(0, func)?;
    let (start, end, offset) = window(text, args.opt_int_at(1, func)?, args.opt_int_at(2, func)?);
    let hay = &text[start..end];
    let found = if reverse {
        hay.rfind(&*needle)
    } else {
        hay.find(&*needle)
    };
    Ok(found.map_or(-1, |b| offset as i64 + char_offset(hay, b)))
}

pub(crate) fn call_str_method(
    interp: &mut Interpreter<'_>,
    s: &Rc<str>,
    name: &str,
    mut args: Args,
) -> EvalResult<Object> {
    let text: &str = s;
    let str_obj = |v: String| -> EvalResult<Object> { Ok(Object::str_from(v)) };
    match name {
        "upper" => {
            args.expect(name, 0, 0)?;
            str_obj(text.to_uppercase())
        }
        "lower" | "casefold" => {
            args.expect(name, 0, 0)?;
            str_obj(text.to_lowercase())
        }
        "swapcase" => {
            args.expect(name, 0, 0)?;
            str_obj(
                text.chars()
                    .flat_map(|c| -> Vec<char> {
                        if c.is_uppercase() {
                            c.to_lowercase().collect()
                        } else {
                            c.to_uppercase().collect()
                        }
                    })
                    .collect(),
            )
        }
        "capitalize" => {
            args.expect(name, 0, 0)?;
            let mut chars = text.chars();
            str_obj(match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            })
        }
        "title" => {
            args.expect(name, 0, 0)?;
            str_obj(title_case(text))
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(&args, name)?;
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => text.trim_matches(matches),
                "lstrip" => text.trim_start_matches(matches),
                _ => text.trim_end_matches(matches),
            };
            str_obj(out.to_string())
        }
        "removeprefix" => {
            args.expect(name, 1, 1)?;
            let prefix = args.str_at(0, name)?;
            str_obj(text.strip_prefix(&*prefix).unwrap_or(text).to_string())
        }
        "removesuffix" => {
            args.expect(name, 1, 1)?;
            let suffix = args.str_at(0, name)?;
            str_obj(text.strip_suffix(&*suffix).unwrap_or(text).to_string())
        }
        "startswith" | "endswith" => {
            args.expect(name, 1, 3)?;
            let candidates = affixes(args.first(), name)?;
            let (start, end, _) = window(text, args.opt_int_at(1, name)?, args.opt_int_at(2, name)?);
            let hay = &text[start..end];
            Ok(Object::Bool(candidates.iter().any(|c| {
                if name == "startswith" {
                    hay.starts_with(&**c)
                } else {
                    hay.ends_with(&**c)
                }
            })))
        }
        "find" => Ok(Object::Int(find_in(text, &args, name, false)?)),
        "rfind" => Ok(Object::Int(find_in(text, &args, name, true)?)),
        "index" | "rindex" => match find_in(text, &args, name, name == "rindex")? {
            -1 => Err(value_error("substring not found")),
            i => Ok(Object::Int(i)),
        },
        "count" => {
            args.expect(name, 1, 3)?;
            let needle = args.str_at(0, name)?;
            let (start, end, _) = window(text, args.opt_int_at(1, name)?, args.opt_int_at(2, name)?);
            let hay = &text[start..end];
            let count = if needle.is_empty() {
                hay.chars().count() + 1
            } else {
                hay.matches(&*needle).count()
            };
            Ok(Object::Int(count as i64))
        }
        "replace" => {
            args.expect(name, 2, 3)?;
            let old = args.str_at(0, name)?;
            let new = args.str_at(1, name)?;
            let out = match args.opt_int_at(2, name)? {
                Some(n) if n >= 0 => text.replacen(&*old, &new, n as usize),
                _ => text.replace(&*old, &new),
            };
            interp.charge(out.len() / 64)?;
            str_obj(out)
        }
        "split" => {
            let (sep, maxsplit) = split_args(&mut args, name)?;
            let parts = match sep {
                None => split_whitespace(text, maxsplit),
                Some(sep) => match maxsplit {
                    Some(m) => text.splitn(m + 1, &*sep).map(Object::str_from).collect(),
                    None => text.split(&*sep).map(Object::str_from).collect(),
                },
            };
            interp.charge(parts.len())?;
            Ok(Object::list(parts))
        }
        "rsplit" => {
            let (sep, maxsplit) = split_args(&mut args, name)?;
            let parts = match sep {
                None => rsplit_whitespace(text, maxsplit),
                Some(sep) => {
                    let mut parts: Vec<Object> = match maxsplit {
                        Some(m) => text.rsplitn(m + 1, &*sep).map(Object::str_from).collect(),
                        None => text.rsplit(&*sep).map(Object::str_from).collect(),
                    };
                    parts.reverse();
                    parts
                }
            };
            interp.charge(parts.len())?;
            Ok(Object::list(parts))
        }
        "splitlines" => {
            args.keyword_to_positional("keepends", 0);
            args.expect(name, 0, 1)?;
            Ok(Object::list(splitlines(text, args.first().truthy())))
        }
        "partition" | "rpartition" => {
            args.expect(name, 1, 1)?;
            let sep = args.str_at(0, name)?;
            if sep.is_empty() {
                return Err(value_error("empty separator"));
            }
            let found = if name == "partition" {
                text.find(&*sep)
            } else {
                text.rfind(&*sep)
            };
            let parts = match found {
                Some(i) => [&text[..i], &*sep, &text[i + sep.len()..]],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Ok(Object::tuple(parts.iter().map(|p| Object::str_from(*p)).collect()))
        }
        "join" => {
            args.expect(name, 1, 1)?;
            let items = interp.iterate(args.first())?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Object::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            let out = parts.join(text);
            interp.charge(out.len() / 64)?;
            str_obj(out)
        }
        "center" | "ljust" | "rjust" => {
            let (width, fill_char) = pad_args(&args, name)?;
            let len = text.chars().count();
            if width <= len {
                return str_obj(text.to_string());
            }
            let margin = width - len;
            let (left, right) = match name {
                "ljust" => (0, margin),
                "rjust" => (margin, 0),
                _ => {
                    let left = margin / 2 + (margin & width & 1);
                    (left, margin - left)
                }
            };
            str_obj(format!("{}{text}{}", fill(fill_char, left), fill(fill_char, right)))
        }
        "zfill" => {
            args.expect(name, 1, 1)?;
            let width = usize::try_from(args.int_at(0, name)?).unwrap_or(0);
            let len = text.chars().count();
            if width <= len {
                return str_obj(text.to_string());
            }
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                _ => (String::new(), text),
            };
            str_obj(format!("{sign}{}{digits}", fill('0', width - len)))
        }
        "isalpha" | "isalnum" | "isdigit" | "isdecimal" | "isnumeric" | "isspace" => {
            args.expect(name, 0, 0)?;
            let test: fn(char) -> bool = match name {
                "isalpha" => char::is_alphabetic,
                "isalnum" => char::is_alphanumeric,
                "isnumeric" => char::is_numeric,
                "isspace" => char::is_whitespace,
                _ => |c| c.is_ascii_digit(),
            };
            Ok(Object::Bool(!text.is_empty() && text.chars().all(test)))
        }
        "islower" => {
            args.expect(name, 0, 0)?;
            Ok(Object::Bool(
                text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase),
            ))
        }
        "isupper" => {
            args.expect(name, 0, 0)?;
            Ok(Object::Bool(
                text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase),
            ))
        }
        "istitle" => {
            args.expect(name, 0, 0)?;
            Ok(Object::Bool(is_title(text)))
        }
        "format" => str_obj(str_format(interp, text, &args)?),
        _ => Err(exc(
            ExcKind::AttributeError,
            format!("'str' object has no attribute '{name}'"),
        )),
    }
}

/// `template.format(*args, **kwargs)`.
pub(crate) fn str_format(interp: &mut Interpreter<'_>, template: &str, args: &Args) -> EvalResult<String> {
    let mut auto = 0usize;
    format_template(interp, template, args, &mut auto)
}

fn format_template(
    interp: &mut Interpreter<'_>,
    template: &str,
    args: &Args,
    auto: &mut usize,
) -> EvalResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '{' => {
                let mut depth = 1;
                let mut j = i + 1;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth != 0 {
                    return Err(value_error("Single '{' encountered in format string"));
                }
                let field: String = chars[i + 1..j - 1].iter().collect();
                let rendered = format_field(interp, &field, args, auto)?;
                out.push_str(&rendered);
                i = j;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => return Err(value_error("Single '}' encountered in format string")),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    interp.charge(out.len() / 64)?;
    Ok(out)
}

fn format_field(
    interp: &mut Interpreter<'_>,
    field: &str,
    args: &Args,
    auto: &mut usize,
) -> EvalResult<String> {
    let mut bracket = false;
    let split = field.char_indices().find(|&(_, c)| {
        match c {
            '[' => bracket = true,
            ']' => bracket = false,
            ':' | '!' if !bracket => return true,
            _ => {}
        }
        false
    });
    let (reference, rest) = match split {
        Some((at, _)) => (&field[..at], &field[at..]),
        None => (field, ""),
    };
    let (conversion, spec) = match rest.strip_prefix('!') {
        Some(after) => match after.split_once(':') {
            Some((conv, spec)) => (Some(conv), spec),
            None => (Some(after), ""),
        },
        None => (None, rest.strip_prefix(':').unwrap_or(rest)),
    };

    let head_end = reference.find(['.', '[']).unwrap_or(reference.len());
    let head = &reference[..head_end];
    let mut value = if head.is_empty() {
        let idx = *auto;
        *auto += 1;
        args.get(idx).cloned().ok_or_else(|| {
            exc(
                ExcKind::IndexError,
                format!("Replacement index {idx} out of range for positional args tuple"),
            )
        })?
    } else if let Ok(idx) = head.parse::<usize>() {
        args.get(idx).cloned().ok_or_else(|| {
            exc(
                ExcKind::IndexError,
                format!("Replacement index {idx} out of range for positional args tuple"),
            )
        })?
    } else {
        args.keywords
            .iter()
            .find(|(k, _)| k == head)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| exc(ExcKind::KeyError, format!("'{head}'")))?
    };

    let mut rest = &reference[head_end..];
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            value = interp.get_attribute(&value, &after[..end])?;
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| value_error("Missing ']' in format string"))?;
            let key = &after[..end];
            let key = key
                .parse::<i64>()
                .map(Object::Int)
                .unwrap_or_else(|_| Object::str_from(key));
            value = interp.get_item(&value, &Index::Item(key))?;
            rest = &after[end + 1..];
        } else {
            return Err(value_error(
                "Only '.' or '[' may follow ']' in format field specifier",
            ));
        }
    }

    let value = match conversion {
        None => value,
        Some("s") => Object::str_from(value.try_str()?),
        Some("r") => Object::str_from(value.try_repr()?),
        Some("a") => Object::str_from(ascii(&value.try_repr()?)),
        Some(other) => {
            return Err(value_error(format!(
                "Unknown conversion specifier {other}"
            )))
        }
    };
    let spec = if spec.contains('{') {
        format_template(interp, spec, args, auto)?
    } else {
        spec.to_string()
    };
    format_value(&value, &spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value_applies_specs() {
        assert_eq!(format_value(&Object::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Object::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Object::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Object::str_from("ab"), "*^6").unwrap(), "**ab**");
        assert!(format_value(&Object::list(vec![]), ">3").is_err());
        assert_eq!(format_value(&Object::None, "").unwrap(), "None");
    }

    #[test]
    fn test_ascii_escapes() {
        assert_eq!(ascii("'caf\u{e9}'"), "'caf\\xe9'");
        assert_eq!(ascii("\u{2603}"), "\\u2603");
    }

    #[test]
    fn test_whitespace_split_with_limits() {
        let parts: Vec<String> = split_whitespace("  a b  c ", Some(1))
            .iter()
            .map(Object::str)
            .collect();
        assert_eq!(parts, vec!["a", "b  c "]);
        let parts: Vec<String> = rsplit_whitespace("  a b  c ", Some(1))
            .iter()
            .map(Object::str)
            .collect();
        assert_eq!(parts, vec!["  a b", "c"]);
    }

    #[test]
    fn test_title_rules() {
        assert_eq!(title_case("hello wORLD 2nd"), "Hello World 2Nd");
        assert!(is_title("Hello World"));
        assert!(!is_title("Hello world"));
        assert!(!is_title("123"));
    }

    #[test]
    fn test_splitlines_variants() {
        let lines: Vec<String> = splitlines("a\r\nb\nc", false).iter().map(Object::str).collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
        let lines: Vec<String> = splitlines("a\nb\n", true).iter().map(Object::str).collect();
        assert_eq!(lines, vec!["a\n", "b\n"]);
    }
}

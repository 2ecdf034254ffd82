//! Python-compatible text formatting for numbers and strings.
//!
//! The model reasons about what `print` and `repr` will show, so these helpers
//! reproduce the grammar's observable output: shortest round-trip float
//! digits, quote selection for string reprs, and the format-spec
//! mini-language used by `format()`, f-strings and `str.format`.

/// `repr(float)` / `str(float)`.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let (negative, digits, exp) = shortest_digits(value);
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = (exp + 1) as usize;
            if digits.len() <= int_len {
                out.push_str(&digits);
                out.push_str(&"0".repeat(int_len - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        } else {
            out.push_str("0.");
            out.push_str(&"0".repeat((-exp - 1) as usize));
            out.push_str(&digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push_str(&exponent_suffix('e', exp));
    }
    out
}

/// Sign, significant digits and decimal exponent of the shortest
/// representation that round-trips.
fn shortest_digits(value: f64) -> (bool, String, i32) {
    let sci = format!("{value:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp = exp.parse::<i32>().unwrap_or(0);
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    (negative, digits, exp)
}

fn exponent_suffix(marker: char, exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{marker}{sign}{:02}", exp.abs())
}

/// `repr(str)`: single quotes unless the text contains only single quotes.
pub(crate) fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: char,
    pub alternate: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

const ALIGNMENTS: [char; 4] = ['<', '>', '=', '^'];

impl FormatSpec {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;

        if chars.len() >= 2 && ALIGNMENTS.contains(&chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && ALIGNMENTS.contains(&chars[0]) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
            out.sign = chars[i];
            i += 1;
        }
        if i < chars.len() && chars[i] == 'z' {
            i += 1;
        }
        if i < chars.len() && chars[i] == '#' {
            out.alternate = true;
            i += 1;
        }
        if i < chars.len() && chars[i] == '0' {
            if out.align.is_none() {
                out.fill = '0';
                out.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            out.width = chars[start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| "Too many decimal digits in format string".to_string())?;
        }
        if i < chars.len() && matches!(chars[i], ',' | '_') {
            out.grouping = Some(chars[i]);
            i += 1;
        }
        if i < chars.len() && chars[i] == '.' {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i == start {
                return Err("Format specifier missing precision".to_string());
            }
            out.precision = Some(
                chars[start..i]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .map_err(|_| "Too many decimal digits in format string".to_string())?,
            );
        }
        if i < chars.len() {
            out.kind = Some(chars[i]);
            i += 1;
        }
        if i < chars.len() {
            return Err("Invalid format specifier".to_string());
        }
        Ok(out)
    }

    fn pad(&self, sign: &str, body: &str, default_align: char) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{sign}{body}");
        }
        let padding = self.width - len;
        let fill = |n: usize| self.fill.to_string().repeat(n);
        match self.align.unwrap_or(default_align) {
            '<' => format!("{sign}{body}{}", fill(padding)),
            '^' => {
                let left = padding / 2;
                format!("{}{sign}{body}{}", fill(left), fill(padding - left))
            }
            '=' => format!("{sign}{}{body}", fill(padding)),
            _ => format!("{}{sign}{body}", fill(padding)),
        }
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, '+') => "+",
            (false, ' ') => " ",
            _ => "",
        }
    }
}

/// Apply a spec to text (`s` or no type code).
pub(crate) fn format_str(value: &str, spec: &FormatSpec) -> Result<String, String> {
    match spec.kind {
        None | Some('s') => {}
        Some(code) => {
            return Err(format!(
                "Unknown format code '{code}' for object of type 'str'"
            ))
        }
    }
    if spec.sign != '-' {
        return Err("Sign not allowed in string format specifier".to_string());
    }
    let body: String = match spec.precision {
        Some(p) => value.chars().take(p).collect(),
        None => value.to_string(),
    };
    Ok(spec.pad("", &body, '<'))
}

/// Apply a spec to an integer.
pub(crate) fn format_int(value: i64, spec: &FormatSpec) -> Result<String, String> {
    let negative = value < 0;
    let magnitude = value.unsigned_abs();
    let (prefix, digits, group_size) = match spec.kind {
        None | Some('d') | Some('n') => (String::new(), magnitude.to_string(), 3),
        Some('b') => ("0b".to_string(), format!("{magnitude:b}"), 4),
        Some('o') => ("0o".to_string(), format!("{magnitude:o}"), 4),
        Some('x') => ("0x".to_string(), format!("{magnitude:x}"), 4),
        Some('X') => ("0X".to_string(), format!("{magnitude:X}"), 4),
        Some('c') => {
            let c = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| "%c arg not in range(0x110000)".to_string())?;
            return Ok(spec.pad("", &c.to_string(), '<'));
        }
        Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
            return format_float(value as f64, spec);
        }
        Some(code) => {
            return Err(format!(
                "Unknown format code '{code}' for object of type 'int'"
            ))
        }
    };
    if spec.precision.is_some() {
        return Err("Precision not allowed in integer format specifier".to_string());
    }
    let digits = match spec.grouping {
        Some(sep) => group_digits(&digits, sep, group_size),
        None => digits,
    };
    let prefix = if spec.alternate { prefix } else { String::new() };
    let sign = format!("{}{prefix}", spec.sign_for(negative));
    Ok(spec.pad(&sign, &digits, '>'))
}

/// Apply a spec to a float.
pub(crate) fn format_float(value: f64, spec: &FormatSpec) -> Result<String, String> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));

    let mut body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if upper {
            text.to_uppercase()
        } else {
            text.to_string()
        };
        if spec.kind == Some('%') {
            format!("{text}%")
        } else {
            text
        }
    } else {
        match spec.kind {
            None => match spec.precision {
                None => float_repr(magnitude),
                Some(p) => general(magnitude, p.max(1), spec.alternate, true),
            },
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => scientific(magnitude, spec.precision.unwrap_or(6), 'e'),
            Some('g' | 'G') => general(
                magnitude,
                spec.precision.unwrap_or(6).max(1),
                spec.alternate,
                false,
            ),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            Some('n') => general(magnitude, spec.precision.unwrap_or(6).max(1), false, false),
            Some(code) => {
                return Err(format!(
                    "Unknown format code '{code}' for object of type 'float'"
                ))
            }
        }
    };
    if upper {
        body = body.to_uppercase();
    }
    if let Some(sep) = spec.grouping {
        body = group_float(&body, sep);
    }
    Ok(spec.pad(spec.sign_for(negative), &body, '>'))
}

fn scientific(magnitude: f64, precision: usize, marker: char) -> String {
    let raw = format!("{magnitude:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp = exp.parse::<i32>().unwrap_or(0);
            format!("{mantissa}{}", exponent_suffix(marker, exp))
        }
        None => raw,
    }
}

/// The `g` presentation; `repr_style` keeps at least one fractional digit,
/// which is what a spec with precision but no type code does.
fn general(magnitude: f64, precision: usize, alternate: bool, repr_style: bool) -> String {
    if magnitude == 0.0 {
        return if repr_style { "0.0" } else { "0" }.to_string();
    }
    let probe = format!("{:.*e}", precision - 1, magnitude);
    let exp = probe
        .split_once('e')
        .and_then(|(_, e)| e.parse::<i32>().ok())
        .unwrap_or(0);
    let mut text = if exp >= -4 && exp < precision as i32 {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        format!("{magnitude:.decimals$}")
    } else {
        scientific(magnitude, precision - 1, 'e')
    };
    if !alternate {
        text = strip_trailing_zeros(&text);
    }
    if repr_style && !text.contains(['.', 'e', 'n', 'i']) {
        text.push_str(".0");
    }
    text
}

fn strip_trailing_zeros(text: &str) -> String {
    let (mantissa, exp) = match text.split_once('e') {
        Some((m, e)) => (m, Some(e)),
        None => (text, None),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    match exp {
        Some(e) => format!("{mantissa}e{e}"),
        None => mantissa.to_string(),
    }
}

fn group_float(body: &str, sep: char) -> String {
    let split_at = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (int_part, rest) = body.split_at(split_at);
    format!("{}{rest}", group_digits(int_part, sep, 3))
}

/// Insert `sep` every `size` digits counting from the right.
pub(crate) fn group_digits(digits: &str, sep: char, size: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / size);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % size == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

/// Python's `round()` for floats: ties go to the even neighbour.
pub(crate) fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123456789012345.0), "123456789012345.0");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.00001), "1e-05");
        assert_eq!(float_repr(1.5e-10), "1.5e-10");
        assert_eq!(float_repr(f64::INFINITY), "inf");
        assert_eq!(float_repr(f64::NAN), "nan");
        assert_eq!(float_repr(-0.0), "-0.0");
    }

    #[test]
    fn test_str_repr_quote_selection() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a'b\"c"), "'a\\'b\"c'");
        assert_eq!(str_repr("line\nbreak"), "'line\\nbreak'");
    }

    #[test]
    fn test_format_spec_parse() {
        let spec = FormatSpec::parse("*^10.3f").unwrap();
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.width, 10);
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.kind, Some('f'));

        assert!(FormatSpec::parse("10.f").is_err());
        assert!(FormatSpec::parse("dd").is_err());
    }

    #[test]
    fn test_format_numbers() {
        let f = |spec: &str, v: f64| format_float(v, &FormatSpec::parse(spec).unwrap()).unwrap();
        let i = |spec: &str, v: i64| format_int(v, &FormatSpec::parse(spec).unwrap()).unwrap();

        assert_eq!(f(".2f", 3.14159), "3.14");
        assert_eq!(f("8.3f", -2.5), "  -2.500");
        assert_eq!(f(".2e", 12345.678), "1.23e+04");
        assert_eq!(f("g", 0.00001234), "1.234e-05");
        assert_eq!(f("g", 1234.5), "1234.5");
        assert_eq!(f(".1%", 0.256), "25.6%");
        assert_eq!(f(",.2f", 1234567.891), "1,234,567.89");
        assert_eq!(f(".3", 2.0), "2.0");
        assert_eq!(i("05d", 42), "00042");
        assert_eq!(i(",", 1234567), "1,234,567");
        assert_eq!(i("#x", 255), "0xff");
        assert_eq!(i("+d", 7), "+7");
        assert_eq!(i("<4", 7), "7   ");
    }

    #[test]
    fn test_format_str_padding_and_errors() {
        let spec = FormatSpec::parse(">6").unwrap();
        assert_eq!(format_str("ab", &spec).unwrap(), "    ab");
        let spec = FormatSpec::parse(".2").unwrap();
        assert_eq!(format_str("abcdef", &spec).unwrap(), "ab");
        let spec = FormatSpec::parse("d").unwrap();
        assert!(format_str("x", &spec).is_err());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(0.5), 0.0);
        assert_eq!(round_half_even(1.5), 2.0);
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(-1.5), -2.0);
        assert_eq!(round_half_even(2.4), 2.0);
    }
}

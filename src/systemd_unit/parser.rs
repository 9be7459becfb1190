use super::unit_data::SystemdUnitData;
use super::Error;

type ParseResult<T> = Result<T, Error>;

/// Line-oriented lexer for Systemd's unit-file syntax.
///
/// Produces the ordered `(section, key, value)` stream a unit file describes.
/// Comments and blank lines are dropped here; the "empty value resets the
/// list" semantic is *not* applied here, because drop-ins merged later must
/// still see (and themselves be able to trigger) the reset.
pub(crate) struct Parser<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(data: &'a str) -> Self {
        Self {
            lines: data.lines().enumerate(),
        }
    }

    pub(crate) fn parse(&mut self) -> ParseResult<SystemdUnitData> {
        let mut unit = SystemdUnitData::new();
        let mut section: Option<String> = None;

        while let Some((idx, line)) = self.lines.next() {
            let lineno = idx + 1;
            let stripped = line.trim_start();

            if stripped.is_empty() || is_comment(stripped) {
                continue;
            }

            if stripped.starts_with('[') {
                section = Some(parse_section_header(lineno, stripped.trim_end())?);
                continue;
            }

            let logical = self.collect_logical_line(stripped)?;
            let section = section
                .as_ref()
                .ok_or(Error::DirectiveOutsideSection(lineno))?;

            let (key, value) = parse_directive(lineno, &logical)?;
            unit.append(section, key, value);
        }

        Ok(unit)
    }

    /// Joins continuation lines: a trailing `\` is stripped together with the
    /// newline and the next line's leading whitespace. Comment lines inside a
    /// continuation are skipped, the continuation keeps going after them.
    fn collect_logical_line(&mut self, first: &str) -> ParseResult<String> {
        let mut logical = String::from(first);

        while logical.ends_with('\\') {
            logical.pop();

            let continuation = loop {
                match self.lines.next() {
                    Some((_, line)) if is_comment(line.trim_start()) => continue,
                    Some((_, line)) => break line,
                    None => return Err(Error::DanglingContinuation),
                }
            };

            logical.push_str(continuation.trim_start());
        }

        Ok(logical)
    }
}

fn is_comment(stripped_line: &str) -> bool {
    stripped_line.starts_with('#') || stripped_line.starts_with(';')
}

fn parse_section_header(lineno: usize, header: &str) -> ParseResult<String> {
    let inner = header
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .ok_or_else(|| Error::MalformedSectionHeader(lineno, header.into()))?;

    if inner.is_empty() || inner.contains(['[', ']']) {
        return Err(Error::MalformedSectionHeader(lineno, header.into()));
    }

    Ok(inner.to_string())
}

/// The leftmost `=` splits key from value. The key is trimmed on both sides,
/// the value only on the left: trailing whitespace can be significant in
/// quoted command lines.
fn parse_directive(lineno: usize, logical: &str) -> ParseResult<(String, String)> {
    let (key, value) = logical
        .split_once('=')
        .ok_or_else(|| Error::MalformedDirective(lineno, logical.into()))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(Error::MalformedDirective(lineno, logical.into()));
    }

    Ok((key.to_string(), value.trim_start().to_string()))
}

//! 环境变量展开：`${VAR}`、`${VAR:-default}`、`$VAR`。
//! 未定义的变量展开为空串，`$$` 表示字面量 `$`。

use std::iter::Peekable;
use std::str::Chars;

pub fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Same as [`expand_env_vars`] with an injectable lookup.
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'$') {
            chars.next();
            out.push('$');
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            let inner = take_until_brace(&mut chars);
            match inner.split_once(":-") {
                Some((name, default)) => match lookup(name) {
                    Some(v) if !v.is_empty() => out.push_str(&v),
                    _ => out.push_str(default),
                },
                None => out.push_str(&lookup(&inner).unwrap_or_default()),
            }
        } else {
            let name = take_identifier(&mut chars);
            if name.is_empty() {
                out.push('$');
            } else {
                out.push_str(&lookup(&name).unwrap_or_default());
            }
        }
    }
    out
}

fn take_until_brace(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut name = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            break;
        }
        name.push(c);
    }
    name
}

fn take_identifier(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            break;
        }
        name.push(c);
        chars.next();
    }
    name
}

//! Tracepoint format parsing.
//!
//! For every tracepoint attach point, read the kernel's per-event `format`
//! file (`<events_root>/<category>/<event>/format`), expanding `*`/`?`
//! wildcards by directory globbing, and synthesize a
//! `struct _tracepoint_<category>_<event>` record describing the event's
//! argument layout. The C declaration text is appended to the program (for
//! toolchains that still consume headers) and the parsed record is interned
//! directly so the semantic analyser can resolve `args.field` accesses.
//!
//! Byte-exactness matters: gaps between fields become `__pad_<n>` filler
//! bytes, and integer fields narrower than their reported size are widened
//! by a fixed table. Type names referenced by the format are collected so
//! type resolution can come from BTF instead of kernel headers.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use ktrace_ast::foundation::{Field, Record, SizedType, Span};
use ktrace_ast::{AstContext, ProbeType};

use crate::pass::{CompileEnv, Pass, PassOutcome};
use crate::resolve::wildcard::{has_wildcard, wildcard_match};

/// Create the tracepoint format parsing pass. Runs before semantic
/// analysis; filesystem failures land in the diagnostics sink.
pub fn create_tracepoint_format_pass() -> Pass {
    Pass::new("tracepoint", |ast, env| {
        parse_formats(ast, env);
        PassOutcome::Continue
    })
}

/// One parsed `field:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FormatField {
    c_type: String,
    name: String,
    offset: u64,
    size: u64,
    signed: bool,
}

pub fn parse_formats(ctx: &mut AstContext, env: &mut CompileEnv) -> bool {
    let mut work = Vec::new();
    for probe in &ctx.root.probes {
        if !probe.has_type(ProbeType::Tracepoint) {
            continue;
        }
        for ap in &probe.attach_points {
            if ap.probe_type() == ProbeType::Tracepoint {
                work.push((ap.target().to_string(), ap.func().to_string(), ap.span));
            }
        }
    }
    if work.is_empty() {
        return true;
    }

    let mut seen = std::collections::BTreeSet::new();
    for (category, event, span) in work {
        if has_wildcard(&category) || has_wildcard(&event) {
            let matches = glob_events(&env.events_root, &category, &event);
            if matches.is_empty() {
                let diag = ctx.diagnostics.error(
                    span,
                    format!("tracepoints not found: {category}:{event}"),
                );
                if category == "syscall" {
                    diag.hint(format!("Did you mean syscalls:{event}?"));
                }
                return false;
            }
            for (real_category, real_event) in matches {
                add_event(ctx, env, &mut seen, &real_category, &real_event, span);
            }
        } else {
            add_event(ctx, env, &mut seen, &category, &event, span);
        }
    }
    true
}

/// Expand wildcards against the events directory layout. Unreadable
/// directories simply contribute no matches, the same way glob treats them.
fn glob_events(events_root: &Path, category: &str, event: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    let Ok(categories) = fs::read_dir(events_root) else {
        return found;
    };
    let mut categories: Vec<_> = categories
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    categories.sort();
    for cat in categories {
        if !wildcard_match(category, &cat) {
            continue;
        }
        let Ok(events) = fs::read_dir(events_root.join(&cat)) else {
            continue;
        };
        let mut events: Vec<_> = events
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        events.sort();
        for ev in events {
            if wildcard_match(event, &ev) && events_root.join(&cat).join(&ev).join("format").is_file()
            {
                found.push((cat.clone(), ev));
            }
        }
    }
    found
}

fn add_event(
    ctx: &mut AstContext,
    env: &mut CompileEnv,
    seen: &mut std::collections::BTreeSet<String>,
    category: &str,
    event: &str,
    span: Span,
) {
    let struct_name = format!("struct _tracepoint_{category}_{event}");
    if !seen.insert(struct_name.clone()) {
        return;
    }

    let path = env.events_root.join(category).join(event).join("format");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let diag = ctx
                .diagnostics
                .warning(span, format!("tracepoint not found: {category}:{event}"));
            if category == "syscall" {
                diag.hint(format!("Did you mean syscalls:{event}?"));
            }
            return;
        }
        Err(err) => {
            ctx.diagnostics
                .error(span, format!("unexpected error: {err}"));
            return;
        }
    };

    let (declaration, record) = parse_tracepoint_struct(&struct_name, &content, env);
    tracing::debug!(%struct_name, fields = record.fields.len(), "parsed tracepoint format");
    ctx.root.c_definitions.push_str(&declaration);
    ctx.records.add(record);
}

/// Render the C declaration and the interned record for one format file.
fn parse_tracepoint_struct(
    struct_name: &str,
    content: &str,
    env: &mut CompileEnv,
) -> (String, Record) {
    let mut decl = format!("{struct_name}\n{{\n");
    let mut fields = Vec::new();
    let mut last_offset: u64 = 0;

    for line in content.lines() {
        let Some(field) = parse_field_line(line) else {
            continue;
        };

        // fill gaps so the layout stays byte-exact
        if field.offset != 0 && last_offset != 0 && field.offset > last_offset {
            let gap = field.offset - last_offset;
            for i in 0..gap {
                let at = field.offset - gap + i;
                decl.push_str(&format!("  char __pad_{at};\n"));
                fields.push(Field::new(
                    format!("__pad_{at}"),
                    SizedType::integer(8, true),
                    at,
                ));
            }
        }
        last_offset = field.offset + field.size;

        let is_array = field.name.contains('[');
        let mut c_type = field.c_type.clone();
        if c_type.contains("__data_loc") {
            // rewritten so the pointer to the real data fits; the declared
            // type is irrelevant from here on
            c_type = "__attribute__((annotate(\"tp_data_loc\"))) int".to_string();
        } else if !is_array {
            c_type = adjust_integer_types(&c_type, field.size);
        }

        env.btf_idents.insert(c_type.clone());
        if let Some(array_len) = array_suffix(&field.name) {
            if !array_len.is_empty() && !array_len.chars().all(|c| c.is_ascii_digit()) {
                env.btf_idents.insert(array_len.to_string());
            }
        }

        decl.push_str(&format!("  {c_type} {};\n", field.name));
        fields.push(record_field(&field, &c_type));
    }

    decl.push_str("};\n");
    let record = Record::with_fields(struct_name.to_string(), fields, last_offset);
    (decl, record)
}

/// Parse one `field:<type> <name>; offset:<N>; size:<M>; signed:<0|1>;`
/// line. Lines missing any component are skipped, not errors; format files
/// carry prose around the field table.
fn parse_field_line(line: &str) -> Option<FormatField> {
    let field_pos = line.find("field:")?;
    let field_end = line[field_pos..].find(';')? + field_pos;
    let offset_pos = line[field_end..].find("offset:")? + field_end;
    let offset_end = line[offset_pos..].find(';')? + offset_pos;
    let size_pos = line[offset_end..].find("size:")? + offset_end;
    let size_end = line[size_pos..].find(';')? + size_pos;

    let offset = line[offset_pos + 7..offset_end].trim().parse().ok()?;
    let size = line[size_pos + 5..size_end].trim().parse().ok()?;
    let signed = line[size_end..]
        .find("signed:")
        .map(|p| line[size_end + p + 7..].trim_start().starts_with('1'))
        .unwrap_or(false);

    let decl = line[field_pos + 6..field_end].trim();
    let split = decl.rfind([' ', '\t'])?;
    let c_type = decl[..split].trim().to_string();
    let name = decl[split + 1..].trim().to_string();
    Some(FormatField {
        c_type,
        name,
        offset,
        size,
        signed,
    })
}

/// Widen integer fields whose declared type is narrower than their size.
/// Unusual C spellings (e.g. `long long unsigned int`) are left alone.
fn adjust_integer_types(c_type: &str, size: u64) -> String {
    if size == 8 {
        if c_type == "int" {
            return "s64".to_string();
        }
        if matches!(
            c_type,
            "unsigned int" | "unsigned" | "u32" | "pid_t" | "uid_t" | "gid_t"
        ) {
            return "u64".to_string();
        }
    }
    c_type.to_string()
}

/// The array length spelled in a field name, e.g. `comm[16]` -> `16`.
fn array_suffix(name: &str) -> Option<&str> {
    let open = name.find('[')?;
    let close = name.find(']')?;
    name.get(open + 1..close)
}

/// Build the interned field from the reported offset/size/signedness. The
/// data-location annotation becomes a tagged 32-bit integer holding the
/// offset/length word.
fn record_field(field: &FormatField, c_type: &str) -> Field {
    let base_name = field
        .name
        .split('[')
        .next()
        .unwrap_or(&field.name)
        .to_string();

    let ty = if c_type.contains("tp_data_loc") {
        SizedType::integer(32, true)
    } else if let Some(len_str) = array_suffix(&field.name) {
        let len: u64 = len_str.parse().unwrap_or(field.size);
        let elem_size = if len > 0 { field.size / len } else { 1 };
        let bits = (elem_size.clamp(1, 8) * 8) as u8;
        SizedType::array(SizedType::integer(bits, field.signed), len.max(1))
    } else {
        match field.size {
            1 | 2 | 4 | 8 => SizedType::integer((field.size * 8) as u8, field.signed),
            _ => SizedType::array(SizedType::integer(8, field.signed), field.size),
        }
    };
    Field::new(base_name, ty, field.offset)
}

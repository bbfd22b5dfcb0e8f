//! Static catalog mapping language ids to launch strategies.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

/// Command line template. `{source}`, `{dir}`, `{class}` and `{exe}` are
/// substituted with the per-request paths before launch; the program
/// itself may be a placeholder for compiled artifacts.
#[derive(Debug, Clone, Copy)]
pub struct CommandTemplate {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub enum ExecutionMode {
    Interpret,
    CompileThenRun { compile: CommandTemplate },
}

#[derive(Debug, Clone, Copy)]
pub struct LanguageSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub extensions: &'static [&'static str],
    pub mode: ExecutionMode,
    pub run: CommandTemplate,
    pub timeout: Duration,
}

impl LanguageSpec {
    pub fn is_compiled(&self) -> bool {
        matches!(self.mode, ExecutionMode::CompileThenRun { .. })
    }
}

const INTERPRET_TIMEOUT: Duration = Duration::from_secs(10);
const COMPILE_TIMEOUT: Duration = Duration::from_secs(15);

pub const CATALOG: &[LanguageSpec] = &[
    LanguageSpec {
        id: "javascript",
        display_name: "JavaScript",
        extensions: &["js", "mjs"],
        mode: ExecutionMode::Interpret,
        run: CommandTemplate {
            program: "node",
            args: &["{source}"],
        },
        timeout: INTERPRET_TIMEOUT,
    },
    LanguageSpec {
        id: "python",
        display_name: "Python",
        extensions: &["py"],
        mode: ExecutionMode::Interpret,
        run: CommandTemplate {
            program: "python3",
            args: &["{source}"],
        },
        timeout: INTERPRET_TIMEOUT,
    },
    LanguageSpec {
        id: "java",
        display_name: "Java",
        extensions: &["java"],
        mode: ExecutionMode::CompileThenRun {
            compile: CommandTemplate {
                program: "javac",
                args: &["{source}"],
            },
        },
        run: CommandTemplate {
            program: "java",
            args: &["-cp", "{dir}", "{class}"],
        },
        timeout: COMPILE_TIMEOUT,
    },
    LanguageSpec {
        id: "c",
        display_name: "C",
        extensions: &["c"],
        mode: ExecutionMode::CompileThenRun {
            compile: CommandTemplate {
                program: "gcc",
                args: &["{source}", "-o", "{exe}"],
            },
        },
        run: CommandTemplate {
            program: "{exe}",
            args: &[],
        },
        timeout: COMPILE_TIMEOUT,
    },
    LanguageSpec {
        id: "cpp",
        display_name: "C++",
        extensions: &["cpp", "cc", "cxx"],
        mode: ExecutionMode::CompileThenRun {
            compile: CommandTemplate {
                program: "g++",
                args: &["{source}", "-o", "{exe}"],
            },
        },
        run: CommandTemplate {
            program: "{exe}",
            args: &[],
        },
        timeout: COMPILE_TIMEOUT,
    },
];

pub fn lookup(id: &str) -> Option<&'static LanguageSpec> {
    CATALOG.iter().find(|spec| spec.id.eq_ignore_ascii_case(id))
}

pub fn from_extension(ext: &str) -> Option<&'static LanguageSpec> {
    let ext = ext.trim_start_matches('.');
    CATALOG
        .iter()
        .find(|spec| spec.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

pub fn infer_from_filename(filename: &str) -> Option<&'static LanguageSpec> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    from_extension(ext)
}

/// Picks the language for a request. The filename's extension wins over the
/// explicit id whenever it maps to a known language; otherwise the explicit
/// id decides. `None` means the request names no supported language.
pub fn resolve(
    explicit: Option<&str>,
    filename: Option<&str>,
) -> Option<&'static LanguageSpec> {
    if let Some(spec) = filename.and_then(infer_from_filename) {
        return Some(spec);
    }
    explicit.and_then(lookup)
}

/// File name the source must be materialized under. Java insists that the
/// file name matches the public class, so the source is scanned for it.
pub fn source_file_name(spec: &LanguageSpec, code: &str) -> String {
    if spec.id == "java" {
        format!("{}.java", java_entry_point(code))
    } else {
        format!("main.{}", spec.extensions[0])
    }
}

/// Heuristic scan for the Java entry-point class name: the first
/// `public class`, falling back to any `class`, then to `Main`.
pub fn java_entry_point(code: &str) -> String {
    static PUBLIC_CLASS: OnceLock<Regex> = OnceLock::new();
    static ANY_CLASS: OnceLock<Regex> = OnceLock::new();

    let public_class = PUBLIC_CLASS.get_or_init(|| {
        Regex::new(r"\bpublic\s+(?:final\s+|abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
            .expect("valid regex")
    });
    let any_class = ANY_CLASS.get_or_init(|| {
        Regex::new(r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)").expect("valid regex")
    });

    public_class
        .captures(code)
        .or_else(|| any_class.captures(code))
        .map_or_else(|| "Main".to_string(), |caps| caps[1].to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub file_extensions: &'static [&'static str],
}

pub fn list() -> Vec<LanguageInfo> {
    CATALOG
        .iter()
        .map(|spec| LanguageInfo {
            id: spec.id,
            display_name: spec.display_name,
            file_extensions: spec.extensions,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("python").map(|s| s.id), Some("python"));
        assert_eq!(lookup("Python").map(|s| s.id), Some("python"));
        assert!(lookup("cobol").is_none());
    }

    #[test]
    fn extension_inference() {
        assert_eq!(infer_from_filename("app.py").map(|s| s.id), Some("python"));
        assert_eq!(infer_from_filename("Main.JAVA").map(|s| s.id), Some("java"));
        assert_eq!(infer_from_filename("x.cc").map(|s| s.id), Some("cpp"));
        assert!(infer_from_filename("noext").is_none());
        assert!(infer_from_filename(".gitignore").is_none());
        assert!(infer_from_filename("data.csv").is_none());
    }

    #[test]
    fn filename_wins_over_explicit_id() {
        let spec = resolve(Some("python"), Some("script.js"));
        assert_eq!(spec.map(|s| s.id), Some("javascript"));
    }

    #[test]
    fn explicit_id_used_when_filename_is_unhelpful() {
        assert_eq!(
            resolve(Some("python"), Some("notes.txt")).map(|s| s.id),
            Some("python")
        );
        assert_eq!(resolve(Some("python"), None).map(|s| s.id), Some("python"));
        assert!(resolve(Some("fortran"), None).is_none());
        assert!(resolve(None, None).is_none());
    }

    #[test]
    fn java_entry_point_detection() {
        assert_eq!(
            java_entry_point("public class HelloWorld { public static void main(String[] a) {} }"),
            "HelloWorld"
        );
        assert_eq!(
            java_entry_point("import java.util.*;\npublic final class App {}"),
            "App"
        );
        assert_eq!(java_entry_point("class Helper {}"), "Helper");
        assert_eq!(java_entry_point("// nothing here"), "Main");
    }

    #[test]
    fn source_file_names_follow_language_convention() {
        let python = lookup("python").expect("python is in the catalog");
        assert_eq!(source_file_name(python, "print(1)"), "main.py");

        let java = lookup("java").expect("java is in the catalog");
        assert_eq!(
            source_file_name(java, "public class Greeter {}"),
            "Greeter.java"
        );
    }

    #[test]
    fn compiled_languages_carry_a_compile_template() {
        for spec in CATALOG {
            match spec.mode {
                ExecutionMode::Interpret => assert!(!spec.is_compiled()),
                ExecutionMode::CompileThenRun { compile } => {
                    assert!(spec.is_compiled());
                    assert!(!compile.program.is_empty());
                }
            }
        }
    }
}

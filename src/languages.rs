//! Toolchain adapter: language tag → compile/run commands
//!
//! The set of languages is closed. Adding one means adding a `Language`
//! variant and filling in every `match` below.

use std::fmt;
use std::path::Path;

use crate::config::JudgeConfig;
use crate::core::{JudgeError, Result};

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
}

/// How a language turns source into something runnable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainKind {
    CompiledNative,
    CompiledBytecode,
    Interpreted,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::C, Language::Cpp, Language::Java, Language::Python];

    /// Parse a language tag (case-insensitive, with aliases)
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cc" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "py" | "python3" => Ok(Language::Python),
            _ => Err(JudgeError::UnsupportedLanguage(tag.to_string())),
        }
    }

    /// Canonical tag, also the key of `[languages.<tag>]` in the config
    pub fn tag(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
        }
    }

    pub fn kind(&self) -> ToolchainKind {
        match self {
            Language::C | Language::Cpp => ToolchainKind::CompiledNative,
            Language::Java => ToolchainKind::CompiledBytecode,
            Language::Python => ToolchainKind::Interpreted,
        }
    }

    fn default_compiler(&self) -> Option<&'static str> {
        match self {
            Language::C => Some("gcc"),
            Language::Cpp => Some("g++"),
            Language::Java => Some("javac"),
            Language::Python => None,
        }
    }

    fn default_runtime(&self) -> Option<&'static str> {
        match self {
            Language::C | Language::Cpp => None,
            Language::Java => Some("java"),
            Language::Python => Some("python3"),
        }
    }

    /// (compiler, runtime) binaries after config overrides
    fn resolve_binaries(&self, config: &JudgeConfig) -> (Option<String>, Option<String>) {
        let overrides = config.language(self.tag());
        let compiler = overrides
            .and_then(|o| o.compiler.clone())
            .or_else(|| self.default_compiler().map(str::to_string));
        let runtime = overrides
            .and_then(|o| o.runtime.clone())
            .or_else(|| self.default_runtime().map(str::to_string));
        (compiler, runtime)
    }

    /// External binaries this language needs, after config overrides
    pub fn binaries(&self, config: &JudgeConfig) -> Vec<String> {
        let (compiler, runtime) = self.resolve_binaries(config);
        compiler.into_iter().chain(runtime).collect()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Resolved toolchain for one submission
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub language: Language,
    /// Name of the source file inside the workspace (e.g., "main.cpp")
    pub source_file: String,
    /// Compile command (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command template; `{memory_mb}` and `{workdir}` are filled in
    /// per run
    run_template: Vec<String>,
    /// File the compile step must produce
    pub artifact: Option<String>,
    /// (multiplier, bonus_seconds)
    pub time_limit: Option<(u32, u32)>,
    /// (multiplier, bonus_mb)
    pub memory_limit: Option<(u32, u32)>,
}

impl Toolchain {
    /// Resolve the toolchain for `language`. For Java the source file name
    /// is derived from the declared public type, so the file/type naming
    /// rule is settled here and nowhere else.
    pub fn resolve(language: Language, source: &str, config: &JudgeConfig) -> Self {
        let overrides = config.language(language.tag());
        let (compiler, runtime) = language.resolve_binaries(config);

        let (source_file, artifact, compile, run): (String, Option<String>, Option<Vec<&str>>, Vec<&str>) =
            match language {
                Language::C => (
                    "main.c".into(),
                    Some("main".into()),
                    Some(vec!["-O2", "-std=gnu11", "-o", "{artifact}", "{source}", "-lm"]),
                    vec!["{workdir}/{artifact}"],
                ),
                Language::Cpp => (
                    "main.cpp".into(),
                    Some("main".into()),
                    Some(vec!["-O2", "-std=c++17", "-o", "{artifact}", "{source}"]),
                    vec!["{workdir}/{artifact}"],
                ),
                Language::Java => {
                    let class = java_entry_class(source);
                    (
                        format!("{}.java", class),
                        Some(format!("{}.class", class)),
                        Some(vec!["-encoding", "UTF-8", "-d", ".", "{source}"]),
                        vec!["-Xmx{memory_mb}m", "-Xss64m", "-cp", "{workdir}", "{class}"],
                    )
                }
                Language::Python => ("main.py".into(), None, None, vec!["{source}"]),
            };

        let class = artifact
            .as_deref()
            .and_then(|a| a.strip_suffix(".class"))
            .unwrap_or_default()
            .to_string();
        let vars = [
            ("{source}", source_file.as_str()),
            ("{artifact}", artifact.as_deref().unwrap_or_default()),
            ("{class}", class.as_str()),
        ];

        let compile_command = compile.map(|args| {
            compiler
                .clone()
                .into_iter()
                .chain(args.into_iter().map(|arg| render(arg, &vars)))
                .collect()
        });
        let run_template = runtime
            .into_iter()
            .chain(run.into_iter().map(|arg| render(arg, &vars)))
            .collect();

        Self {
            language,
            source_file,
            compile_command,
            run_template,
            artifact,
            time_limit: overrides.and_then(|o| o.time_limit),
            memory_limit: overrides.and_then(|o| o.memory_limit),
        }
    }

    pub fn kind(&self) -> ToolchainKind {
        self.language.kind()
    }

    /// Run command for one execution
    pub fn run_command(&self, memory_mb: u32, workdir: &Path) -> Vec<String> {
        let memory = memory_mb.to_string();
        let workdir = workdir.to_string_lossy();
        let vars = [("{memory_mb}", memory.as_str()), ("{workdir}", workdir.as_ref())];
        self.run_template
            .iter()
            .map(|arg| render(arg, &vars))
            .collect()
    }

    /// Calculate actual time limit based on base time limit
    /// base_time_ms: base time limit in milliseconds (from submission)
    pub fn calculate_time_limit(&self, base_time_ms: u32) -> u32 {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => base_time_ms
                .saturating_mul(multiplier)
                .saturating_add(bonus_seconds.saturating_mul(1000)),
            None => base_time_ms,
        }
    }

    /// Calculate actual memory limit based on base memory limit
    pub fn calculate_memory_limit(&self, base_memory_mb: u32) -> u32 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => base_memory_mb
                .saturating_mul(multiplier)
                .saturating_add(bonus_mb),
            None => base_memory_mb,
        }
    }
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter()
        .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value))
}

/// Name of the first top-level `public` type in a Java source, or `Main`.
///
/// javac requires a public top-level type to live in a file of the same
/// name; comments and string literals are skipped so that commented-out
/// declarations do not count.
pub fn java_entry_class(source: &str) -> String {
    const MODIFIERS: [&str; 6] = ["final", "abstract", "sealed", "non-sealed", "strictfp", "static"];
    const TYPE_KEYWORDS: [&str; 4] = ["class", "interface", "enum", "record"];

    let tokens = java_tokens(source);
    let mut depth = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].as_str() {
            "{" => depth += 1,
            "}" => depth = depth.saturating_sub(1),
            "public" if depth == 0 => {
                let mut j = i + 1;
                while j < tokens.len() && MODIFIERS.contains(&tokens[j].as_str()) {
                    j += 1;
                }
                // annotation type: `public @interface Name`
                if tokens.get(j).map(String::as_str) == Some("@") {
                    j += 1;
                }
                if let (Some(keyword), Some(name)) = (tokens.get(j), tokens.get(j + 1)) {
                    if TYPE_KEYWORDS.contains(&keyword.as_str()) && is_java_identifier(name) {
                        return name.clone();
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    "Main".to_string()
}

fn is_java_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {
            chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

/// Identifier-ish words and single punctuation chars, without comments
/// and literals
fn java_tokens(source: &str) -> Vec<String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
        } else if c == '"' || c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
        } else if c.is_alphanumeric() || c == '_' || c == '$' || c == '-' {
            // '-' keeps `non-sealed` as one token; it never starts a type name
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '-'))
            {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        } else {
            if !c.is_whitespace() {
                tokens.push(c.to_string());
            }
            i += 1;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_language_tags_and_aliases() {
        assert_eq!(Language::from_tag("C++").unwrap(), Language::Cpp);
        assert_eq!(Language::from_tag("py").unwrap(), Language::Python);
        assert_eq!(Language::from_tag(" Java ").unwrap(), Language::Java);
        assert!(matches!(
            Language::from_tag("cobol"),
            Err(JudgeError::UnsupportedLanguage(tag)) if tag == "cobol"
        ));
    }

    #[test]
    fn test_every_kind_is_covered() {
        let kinds: Vec<_> = Language::ALL.iter().map(Language::kind).collect();
        assert!(kinds.contains(&ToolchainKind::CompiledNative));
        assert!(kinds.contains(&ToolchainKind::CompiledBytecode));
        assert!(kinds.contains(&ToolchainKind::Interpreted));
    }

    #[test]
    fn test_resolve_cpp() {
        let toolchain = Toolchain::resolve(Language::Cpp, "int main(){}", &JudgeConfig::default());
        assert_eq!(toolchain.source_file, "main.cpp");
        assert_eq!(toolchain.artifact.as_deref(), Some("main"));
        assert_eq!(
            toolchain.compile_command.clone().unwrap(),
            vec!["g++", "-O2", "-std=c++17", "-o", "main", "main.cpp"]
        );
        assert_eq!(toolchain.run_command(256, Path::new("/ws")), vec!["/ws/main"]);
        assert_eq!(toolchain.kind(), ToolchainKind::CompiledNative);
    }

    #[test]
    fn test_resolve_c_keeps_posix_declarations() {
        let toolchain = Toolchain::resolve(Language::C, "int main(){}", &JudgeConfig::default());
        // strict ISO mode would hide fork(), pid_t and getline()
        assert_eq!(
            toolchain.compile_command.clone().unwrap(),
            vec!["gcc", "-O2", "-std=gnu11", "-o", "main", "main.c", "-lm"]
        );
        assert_eq!(toolchain.run_command(64, Path::new("/ws")), vec!["/ws/main"]);
    }

    #[test]
    fn test_resolve_python_has_no_compile_step() {
        let toolchain = Toolchain::resolve(Language::Python, "print(1)", &JudgeConfig::default());
        assert!(toolchain.compile_command.is_none());
        assert!(toolchain.artifact.is_none());
        assert_eq!(
            toolchain.run_command(64, Path::new("/ws")),
            vec!["python3", "main.py"]
        );
    }

    #[test]
    fn test_resolve_java_names_file_after_public_class() {
        let source = "import java.util.*;\npublic class Solution {\n  public static void main(String[] a) {}\n}\n";
        let toolchain = Toolchain::resolve(Language::Java, source, &JudgeConfig::default());
        assert_eq!(toolchain.source_file, "Solution.java");
        assert_eq!(toolchain.artifact.as_deref(), Some("Solution.class"));
        assert_eq!(
            toolchain.run_command(128, Path::new("/ws/abc")),
            vec!["java", "-Xmx128m", "-Xss64m", "-cp", "/ws/abc", "Solution"]
        );
        assert_eq!(toolchain.kind(), ToolchainKind::CompiledBytecode);
    }

    #[test]
    fn test_java_entry_class_rules() {
        assert_eq!(java_entry_class("class Helper {}"), "Main");
        assert_eq!(
            java_entry_class("// public class Fake {}\n/* public class Nope */\npublic final class Real {}"),
            "Real"
        );
        assert_eq!(
            java_entry_class("class A { public class Inner {} }\npublic class Outer {}"),
            "Outer"
        );
        assert_eq!(
            java_entry_class("class A { String s = \"public class X {\"; }\npublic record P(int x) {}"),
            "P"
        );
        // two public types: the first wins, javac reports the second
        assert_eq!(java_entry_class("public class Main {}\npublic class Ll {}"), "Main");
    }

    #[test]
    fn test_config_overrides_binaries_and_limits() {
        let config = JudgeConfig::from_toml_str(
            r#"
[languages.java]
compiler = "/opt/jdk/bin/javac"
runtime = "/opt/jdk/bin/java"
time_limit = [2, 1]
memory_limit = [1, 64]
"#,
        )
        .unwrap();
        let toolchain = Toolchain::resolve(Language::Java, "public class Main {}", &config);
        assert_eq!(toolchain.compile_command.as_ref().unwrap()[0], "/opt/jdk/bin/javac");
        assert_eq!(toolchain.calculate_time_limit(1000), 3000);
        assert_eq!(toolchain.calculate_memory_limit(256), 320);
        assert_eq!(
            Language::Java.binaries(&config),
            vec!["/opt/jdk/bin/javac", "/opt/jdk/bin/java"]
        );
    }
}

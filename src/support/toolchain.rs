//! Native toolchain dialect selection.
//!
//! The generated module is handed to whatever compiler the host configured;
//! the only coupling is the flag set, chosen by probing the executable name.

use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Gnu,
    Clang,
    Msvc,
}

/// Pick a flag dialect from the configured compiler executable's name.
/// Unrecognized names fall back to the GNU dialect.
pub fn probe(compiler: &str) -> Dialect {
    let name = Path::new(compiler)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(compiler)
        .to_ascii_lowercase();
    if name.contains("clang") {
        Dialect::Clang
    } else if name.contains("cl") && !name.contains("gcc") {
        Dialect::Msvc
    } else {
        Dialect::Gnu
    }
}

impl Dialect {
    /// Flags to compile one translation unit to an object file.
    pub fn compile_flags(&self, debug: bool) -> Vec<&'static str> {
        match self {
            Dialect::Gnu | Dialect::Clang => {
                let mut f = vec!["-c", "-O2", "-fPIC", "-std=c++14"];
                if debug {
                    f.push("-g");
                }
                f
            }
            Dialect::Msvc => {
                let mut f = vec!["/c", "/O2", "/EHsc", "/nologo"];
                if debug {
                    f.push("/Zi");
                }
                f
            }
        }
    }

    /// Flag prefix naming the object output.
    pub fn object_out(&self, path: &str) -> Vec<String> {
        match self {
            Dialect::Gnu | Dialect::Clang => vec!["-o".to_string(), path.to_string()],
            Dialect::Msvc => vec![format!("/Fo{}", path)],
        }
    }

    /// Flags to link objects into a shared runtime library.
    pub fn link_shared(&self, out: &str) -> Vec<String> {
        match self {
            Dialect::Gnu => vec!["-shared".to_string(), "-o".to_string(), out.to_string()],
            Dialect::Clang => vec![
                "-shared".to_string(),
                "-fPIC".to_string(),
                "-o".to_string(),
                out.to_string(),
            ],
            Dialect::Msvc => vec!["/LD".to_string(), format!("/Fe{}", out)],
        }
    }

    pub fn object_extension(&self) -> &'static str {
        match self {
            Dialect::Gnu | Dialect::Clang => "o",
            Dialect::Msvc => "obj",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_by_name() {
        assert_eq!(probe("g++"), Dialect::Gnu);
        assert_eq!(probe("/usr/bin/gcc-12"), Dialect::Gnu);
        assert_eq!(probe("clang++"), Dialect::Clang);
        assert_eq!(probe("C:/tools/clang-cl"), Dialect::Clang);
        assert_eq!(probe("cl"), Dialect::Msvc);
        assert_eq!(probe("cl.exe"), Dialect::Msvc);
        assert_eq!(probe("something-else"), Dialect::Gnu);
    }

    #[test]
    fn test_debug_flag() {
        assert!(Dialect::Gnu.compile_flags(true).contains(&"-g"));
        assert!(!Dialect::Gnu.compile_flags(false).contains(&"-g"));
        assert!(Dialect::Msvc.compile_flags(true).contains(&"/Zi"));
    }
}

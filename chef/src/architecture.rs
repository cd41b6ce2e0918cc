// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use vafs::Architecture;

/// Normalize a recipe-style arch name to the pack architecture tag
pub fn parse(arch: &str) -> Option<Architecture> {
    match arch.to_lowercase().as_str() {
        "x86" | "i386" | "i686" => Some(Architecture::X86),
        "x64" | "amd64" | "x86_64" => Some(Architecture::X64),
        "arm" | "armv7" => Some(Architecture::ARM),
        "arm64" | "aarch64" => Some(Architecture::ARM64),
        "riscv32" => Some(Architecture::RISCV32),
        "riscv64" => Some(Architecture::RISCV64),
        _ => None,
    }
}

/// The recipe-style name of the arch this process runs on
pub fn host() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "x86",
        "aarch64" => "arm64",
        "arm" => "arm",
        "riscv32" => "riscv32",
        "riscv64" => "riscv64",
        _ => "amd64",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(parse("amd64"), Some(Architecture::X64));
        assert_eq!(parse("x86_64"), Some(Architecture::X64));
        assert_eq!(parse("AARCH64"), Some(Architecture::ARM64));
        assert_eq!(parse("riscv64"), Some(Architecture::RISCV64));
        assert_eq!(parse("sparc"), None);
    }

    #[test]
    fn host_is_known() {
        assert!(parse(host()).is_some());
    }
}

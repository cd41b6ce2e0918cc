// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Turns a filtered install tree plus recipe metadata into a pack file.

use std::io;
use std::path::{Path, PathBuf};

use bake_recipe::{Command, CommandType, Pack, PackType, Project};
use fs_err as fs;
use log::info;
use thiserror::Error;

use crate::util::Filter;

/// Resolves the dynamic library closure of a command binary so
/// application packs can ship their own `/lib`. The real resolver is
/// an external collaborator; [`NoResolver`] ships nothing.
pub trait DependencyResolver {
    fn resolve(&self, binary: &Path) -> io::Result<Vec<PathBuf>>;
}

pub struct NoResolver;

impl DependencyResolver for NoResolver {
    fn resolve(&self, _binary: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(vec![])
    }
}

pub struct Request<'a> {
    pub pack: &'a Pack,
    pub project: &'a Project,
    /// Install tree, host view
    pub install_root: &'a Path,
    /// Recipe directory, for icon lookups
    pub project_dir: &'a Path,
    pub output_dir: &'a Path,
    pub architecture: vafs::Architecture,
}

/// Write `<output>/<name>.pack`. An install tree with zero selected
/// files produces no file at all; a failed write removes the partial
/// output before surfacing the error.
pub fn emit(request: &Request<'_>, resolver: &dyn DependencyResolver) -> Result<Option<PathBuf>, Error> {
    let filter = Filter::new(&request.pack.filters).map_err(Error::Filter)?;

    let stats = vafs::tree_stats(request.install_root, |path| filter.matches(path))?;
    if stats.files == 0 {
        info!("pack {} selects no files, skipping", request.pack.name);
        return Ok(None);
    }

    fs::create_dir_all(request.output_dir)?;
    let path = request.output_dir.join(format!("{}.pack", request.pack.name));

    match write_pack(request, &filter, &path, resolver) {
        Ok(_) => Ok(Some(path)),
        Err(e) => {
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}

fn write_pack(
    request: &Request<'_>,
    filter: &Filter,
    path: &Path,
    resolver: &dyn DependencyResolver,
) -> Result<(), Error> {
    let Request {
        pack,
        project,
        install_root,
        project_dir,
        architecture,
        ..
    } = request;

    let file = fs::File::create(path)?;
    let spool = tempfile::tempfile()?;
    let mut writer = vafs::Writer::new(file.into_parts().0, spool, *architecture)?;

    writer.package(&package_meta(pack, project))?;
    writer.version(&project.version.parse()?)?;

    if let Some(icon) = &project.icon {
        writer.icon(&fs::read(project_dir.join(icon))?)?;
    }

    let apps = pack
        .commands
        .iter()
        .map(|command| app(command, project_dir))
        .collect::<Result<Vec<_>, _>>()?;
    writer.apps(&apps)?;

    if let Some(options) = &pack.options {
        writer.options(&vafs::Options {
            bin_dirs: options.bin_paths.clone(),
            inc_dirs: options.inc_paths.clone(),
            lib_dirs: options.lib_paths.clone(),
            compiler_flags: options.compiler_flags.clone(),
            linker_flags: options.linker_flags.clone(),
        })?;
    }

    writer.add_tree(install_root, |path| filter.matches(path))?;

    // Application packs carry the dynamic closure of their commands
    if pack.pack_type == PackType::Application {
        for command in &pack.commands {
            let relative = command.path.strip_prefix("/").unwrap_or(&command.path);

            for dependency in resolver.resolve(&install_root.join(relative))? {
                let name = dependency
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let metadata = fs::metadata(&dependency)?;
                let mut reader = fs::File::open(&dependency)?;

                writer.add_file(format!("lib/{name}"), 0o755, metadata.len(), &mut reader)?;
            }
        }
    }

    writer.finalize()?;

    Ok(())
}

fn package_meta(pack: &Pack, project: &Project) -> vafs::Package {
    vafs::Package {
        pack_type: Some(match pack.pack_type {
            PackType::Bootloader => vafs::PackType::Bootloader,
            PackType::Os => vafs::PackType::Os,
            PackType::Ingredient => vafs::PackType::Ingredient,
            PackType::Content => vafs::PackType::Content,
            PackType::Application => vafs::PackType::Application,
            PackType::Toolchain => vafs::PackType::Toolchain,
        }),
        package: pack.name.clone(),
        summary: project.summary.clone(),
        description: project.description.clone().unwrap_or_default(),
        license: project.license.clone().unwrap_or_default(),
        eula: project.eula.clone().unwrap_or_default(),
        homepage: project.homepage.clone().unwrap_or_default(),
        maintainer: project.author.clone(),
        maintainer_email: project.email.clone(),
    }
}

fn app(command: &Command, project_dir: &Path) -> Result<vafs::App, Error> {
    let icon = match &command.icon {
        Some(icon) => fs::read(project_dir.join(icon))?,
        None => vec![],
    };

    Ok(vafs::App {
        name: command.name.clone(),
        description: command.description.clone().unwrap_or_default(),
        arguments: command.arguments.join(" "),
        app_type: match command.command_type {
            CommandType::Executable => vafs::AppType::Executable,
            CommandType::Daemon => vafs::AppType::Daemon,
        },
        path: command.path.display().to_string(),
        icon,
    })
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pack filter")]
    Filter(#[source] glob::PatternError),
    #[error("project version")]
    Version(#[from] vafs::ParseVersionError),
    #[error("pack write")]
    Write(#[from] vafs::WriteError),
    #[error("io")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixture_project() -> Project {
        serde_yaml::from_str(
            r#"
name: editor
summary: A text editor
version: "1.2"
author: Jane Doe
email: jane@example.com
"#,
        )
        .unwrap()
    }

    fn fixture_pack(yaml: &str) -> Pack {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn empty_install_tree_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("install");
        fs::create_dir_all(&install).unwrap();

        let pack = fixture_pack("{name: editor, type: application}");
        let project = fixture_project();

        let emitted = emit(
            &Request {
                pack: &pack,
                project: &project,
                install_root: &install,
                project_dir: dir.path(),
                output_dir: &dir.path().join("output"),
                architecture: vafs::Architecture::X64,
            },
            &NoResolver,
        )
        .unwrap();

        assert_eq!(emitted, None);
        assert!(!dir.path().join("output/editor.pack").exists());
    }

    #[test]
    fn emit_respects_filters_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("install");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::create_dir_all(install.join("share")).unwrap();
        fs::write(install.join("bin/editor"), b"ELF").unwrap();
        fs::write(install.join("share/junk"), b"junk").unwrap();

        let pack = fixture_pack(
            r#"
name: editor
type: application
filters: [bin]
commands:
  - name: editor
    type: executable
    path: /bin/editor
"#,
        );
        let project = fixture_project();

        let emitted = emit(
            &Request {
                pack: &pack,
                project: &project,
                install_root: &install,
                project_dir: dir.path(),
                output_dir: &dir.path().join("output"),
                architecture: vafs::Architecture::X64,
            },
            &NoResolver,
        )
        .unwrap()
        .expect("pack emitted");

        let bytes = fs::read(emitted).unwrap();
        let pack = vafs::read_bytes(&bytes).unwrap();

        assert_eq!(pack.package().unwrap().package, "editor");
        assert_eq!(pack.package().unwrap().pack_type, Some(vafs::PackType::Application));
        assert_eq!(pack.version().unwrap().to_string(), "1.2.0");
        assert_eq!(pack.apps().len(), 1);
        assert_eq!(pack.apps()[0].path, "/bin/editor");

        let targets: Vec<_> = pack.descriptors().iter().map(|d| d.entry.target().to_owned()).collect();
        assert!(targets.contains(&"bin/editor".to_owned()));
        assert!(!targets.iter().any(|t| t.contains("junk")));
    }

    #[test]
    fn resolver_populates_lib() {
        struct Fixed(PathBuf);

        impl DependencyResolver for Fixed {
            fn resolve(&self, _binary: &Path) -> io::Result<Vec<PathBuf>> {
                Ok(vec![self.0.clone()])
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("install");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::write(install.join("bin/editor"), b"ELF").unwrap();

        let shared = dir.path().join("libc.so.6");
        fs::write(&shared, b"SO").unwrap();

        let pack = fixture_pack(
            r#"
name: editor
type: application
commands:
  - name: editor
    path: /bin/editor
"#,
        );
        let project = fixture_project();

        let emitted = emit(
            &Request {
                pack: &pack,
                project: &project,
                install_root: &install,
                project_dir: dir.path(),
                output_dir: &dir.path().join("output"),
                architecture: vafs::Architecture::X64,
            },
            &Fixed(shared),
        )
        .unwrap()
        .expect("pack emitted");

        let bytes = fs::read(emitted).unwrap();
        let pack = vafs::read_bytes(&bytes).unwrap();

        let targets: Vec<_> = pack.descriptors().iter().map(|d| d.entry.target().to_owned()).collect();
        assert!(targets.contains(&"lib/libc.so.6".to_owned()));
    }
}

// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{Read, Write};
use std::str::FromStr;

use thiserror::Error;

use crate::feature::{DecodeError, EncodeError};
use crate::field::{FieldRead, FieldWrite};

/// What a pack provides, recorded in the package header feature.
///
/// Writers must refuse [`PackType::Unknown`]; it only exists so
/// readers can surface an unrecognized discriminant faithfully.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PackType {
    Unknown = 0,
    Bootloader = 1,
    Os = 2,
    Ingredient = 3,
    Content = 4,
    Application = 5,
    Toolchain = 6,
}

impl PackType {
    fn decode_from(value: u32) -> Result<Self, DecodeError> {
        Ok(match value {
            0 => PackType::Unknown,
            1 => PackType::Bootloader,
            2 => PackType::Os,
            3 => PackType::Ingredient,
            4 => PackType::Content,
            5 => PackType::Application,
            6 => PackType::Toolchain,
            t => return Err(DecodeError::UnknownPackType(t)),
        })
    }
}

/// The package header feature: identity, descriptive text and
/// maintainer fields.
///
/// Encoded as a fixed struct (version, type, eight field lengths)
/// followed by the concatenated UTF-8 payload in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub pack_type: Option<PackType>,
    pub package: String,
    pub summary: String,
    pub description: String,
    pub license: String,
    pub eula: String,
    pub homepage: String,
    pub maintainer: String,
    pub maintainer_email: String,
}

impl Package {
    const VERSION: u32 = 1;

    fn fields(&self) -> [&str; 8] {
        [
            &self.package,
            &self.summary,
            &self.description,
            &self.license,
            &self.eula,
            &self.homepage,
            &self.maintainer,
            &self.maintainer_email,
        ]
    }

    pub(crate) fn decode<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let _version = reader.word()?;
        let pack_type = PackType::decode_from(reader.word()?)?;

        let mut lengths = [0usize; 8];
        for length in &mut lengths {
            *length = reader.count()?;
        }

        let mut strings = lengths.iter().map(|length| reader.text(*length));

        Ok(Self {
            pack_type: Some(pack_type),
            package: strings.next().unwrap()?,
            summary: strings.next().unwrap()?,
            description: strings.next().unwrap()?,
            license: strings.next().unwrap()?,
            eula: strings.next().unwrap()?,
            homepage: strings.next().unwrap()?,
            maintainer: strings.next().unwrap()?,
            maintainer_email: strings.next().unwrap()?,
        })
    }

    pub(crate) fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.put_word(Self::VERSION)?;
        writer.put_word(self.pack_type.unwrap_or(PackType::Unknown) as u32)?;

        for field in self.fields() {
            writer.put_count(field.len())?;
        }
        for field in self.fields() {
            writer.put_text(field)?;
        }

        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        4 + 4 + 8 * 4 + self.fields().iter().map(|f| f.len()).sum::<usize>()
    }
}

/// Package semantic version. Revision is reserved and always 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub revision: u32,
    pub tag: Option<String>,
}

impl Version {
    pub(crate) fn decode<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let major = reader.word()?;
        let minor = reader.word()?;
        let patch = reader.word()?;
        let revision = reader.word()?;
        let tag_length = reader.count()?;

        let tag = if tag_length > 0 {
            Some(reader.text(tag_length)?)
        } else {
            None
        };

        Ok(Self {
            major,
            minor,
            patch,
            revision,
            tag,
        })
    }

    pub(crate) fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let tag = self.tag.as_deref().unwrap_or_default();

        writer.put_word(self.major)?;
        writer.put_word(self.minor)?;
        writer.put_word(self.patch)?;
        writer.put_word(0)?;
        writer.put_count(tag.len())?;
        writer.put_text(tag)?;

        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        5 * 4 + self.tag.as_deref().map(str::len).unwrap_or_default()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.tag {
            write!(f, "+{tag}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    /// `MAJOR "." MINOR ("." PATCH)? ("+" TAG)?`
    ///
    /// A missing patch component is always 0, tag or no tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numbers, tag) = match s.split_once('+') {
            Some((numbers, tag)) if !tag.is_empty() => (numbers, Some(tag.to_owned())),
            Some((_, _)) => return Err(ParseVersionError::EmptyTag(s.to_owned())),
            None => (s, None),
        };

        let mut components = numbers.split('.');

        let mut next_number = |missing_ok| match components.next() {
            Some(number) => number
                .parse::<u32>()
                .map(Some)
                .map_err(|_| ParseVersionError::InvalidComponent(s.to_owned())),
            None if missing_ok => Ok(None),
            None => Err(ParseVersionError::MissingComponent(s.to_owned())),
        };

        let major = next_number(false)?.unwrap_or_default();
        let minor = next_number(false)?.unwrap_or_default();
        let patch = next_number(true)?.unwrap_or_default();

        if components.next().is_some() {
            return Err(ParseVersionError::InvalidComponent(s.to_owned()));
        }

        Ok(Self {
            major,
            minor,
            patch,
            revision: 0,
            tag,
        })
    }
}

#[derive(Debug, Error)]
pub enum ParseVersionError {
    #[error("version `{0}` needs at least major.minor")]
    MissingComponent(String),
    #[error("version `{0}` has a non-numeric or trailing component")]
    InvalidComponent(String),
    #[error("version `{0}` has an empty tag")]
    EmptyTag(String),
}

/// How an application command is launched
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AppType {
    #[default]
    Executable = 0,
    Daemon = 1,
}

impl AppType {
    fn decode_from(value: u32) -> Result<Self, DecodeError> {
        Ok(match value {
            0 => AppType::Executable,
            1 => AppType::Daemon,
            t => return Err(DecodeError::UnknownCommandType(t)),
        })
    }
}

/// One launchable application carried by an application pack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct App {
    pub name: String,
    pub description: String,
    pub arguments: String,
    pub app_type: AppType,
    pub path: String,
    pub icon: Vec<u8>,
}

impl App {
    pub(crate) fn decode<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let name_length = reader.count()?;
        let description_length = reader.count()?;
        let arguments_length = reader.count()?;
        let app_type = AppType::decode_from(reader.word()?)?;
        let path_length = reader.count()?;
        let icon_length = reader.count()?;

        Ok(Self {
            name: reader.text(name_length)?,
            description: reader.text(description_length)?,
            arguments: reader.text(arguments_length)?,
            app_type,
            path: reader.text(path_length)?,
            icon: reader.blob(icon_length)?,
        })
    }

    pub(crate) fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.put_count(self.name.len())?;
        writer.put_count(self.description.len())?;
        writer.put_count(self.arguments.len())?;
        writer.put_word(self.app_type as u32)?;
        writer.put_count(self.path.len())?;
        writer.put_count(self.icon.len())?;
        writer.put_text(&self.name)?;
        writer.put_text(&self.description)?;
        writer.put_text(&self.arguments)?;
        writer.put_text(&self.path)?;
        writer.write_all(&self.icon)?;

        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        6 * 4 + self.name.len() + self.description.len() + self.arguments.len() + self.path.len() + self.icon.len()
    }
}

pub(crate) fn decode_apps<R: Read>(mut reader: R) -> Result<Vec<App>, DecodeError> {
    let count = reader.count()?;

    let mut apps = Vec::with_capacity(count);
    for _ in 0..count {
        apps.push(App::decode(&mut reader)?);
    }

    Ok(apps)
}

pub(crate) fn encode_apps<W: Write>(writer: &mut W, apps: &[App]) -> Result<(), EncodeError> {
    writer.put_count(apps.len())?;
    for app in apps {
        app.encode(writer)?;
    }
    Ok(())
}

pub(crate) fn apps_total_size(apps: &[App]) -> usize {
    4 + apps.iter().map(App::size).sum::<usize>()
}

/// Consumption data carried by ingredient and toolchain packs:
/// search paths relative to the extracted prefix, plus raw flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub bin_dirs: Vec<String>,
    pub inc_dirs: Vec<String>,
    pub lib_dirs: Vec<String>,
    pub compiler_flags: Vec<String>,
    pub linker_flags: Vec<String>,
}

impl Options {
    fn lists(&self) -> [&Vec<String>; 5] {
        [
            &self.bin_dirs,
            &self.inc_dirs,
            &self.lib_dirs,
            &self.compiler_flags,
            &self.linker_flags,
        ]
    }

    pub(crate) fn decode<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let mut decode_list = || -> Result<Vec<String>, DecodeError> {
            let count = reader.count()?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let length = reader.count()?;
                entries.push(reader.text(length)?);
            }
            Ok(entries)
        };

        Ok(Self {
            bin_dirs: decode_list()?,
            inc_dirs: decode_list()?,
            lib_dirs: decode_list()?,
            compiler_flags: decode_list()?,
            linker_flags: decode_list()?,
        })
    }

    pub(crate) fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        for list in self.lists() {
            writer.put_count(list.len())?;
            for entry in list {
                writer.put_count(entry.len())?;
                writer.put_text(entry)?;
            }
        }
        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        self.lists()
            .iter()
            .map(|list| 4 + list.iter().map(|entry| 4 + entry.len()).sum::<usize>())
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn package_roundtrip() {
        let package = Package {
            pack_type: Some(PackType::Application),
            package: "editor".into(),
            summary: "A text editor".into(),
            description: "Edits text, sometimes correctly".into(),
            license: "MPL-2.0".into(),
            eula: String::new(),
            homepage: "https://example.com".into(),
            maintainer: "Jane Doe".into(),
            maintainer_email: "jane@example.com".into(),
        };

        let mut bytes = vec![];
        package.encode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), package.size());

        let decoded = Package::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, package);
    }

    #[test]
    fn version_grammar() {
        let version = "3.4+rc1".parse::<Version>().unwrap();
        assert_eq!(
            version,
            Version {
                major: 3,
                minor: 4,
                patch: 0,
                revision: 0,
                tag: Some("rc1".into())
            }
        );

        let version = "1.2.3".parse::<Version>().unwrap();
        assert_eq!((version.major, version.minor, version.patch), (1, 2, 3));
        assert_eq!(version.tag, None);

        assert!("1".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
        assert!("1.2+".parse::<Version>().is_err());
    }

    #[test]
    fn version_roundtrip() {
        let version = Version {
            major: 0,
            minor: 9,
            patch: 1,
            revision: 0,
            tag: Some("beta".into()),
        };

        let mut bytes = vec![];
        version.encode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), version.size());
        assert_eq!(Version::decode(bytes.as_slice()).unwrap(), version);
    }

    #[test]
    fn apps_roundtrip() {
        let apps = vec![
            App {
                name: "editor".into(),
                description: "launch the editor".into(),
                arguments: "--fullscreen".into(),
                app_type: AppType::Executable,
                path: "/usr/bin/editor".into(),
                icon: vec![0xde, 0xad],
            },
            App {
                name: "editord".into(),
                description: String::new(),
                arguments: String::new(),
                app_type: AppType::Daemon,
                path: "/usr/bin/editord".into(),
                icon: vec![],
            },
        ];

        let mut bytes = vec![];
        encode_apps(&mut bytes, &apps).unwrap();
        assert_eq!(bytes.len(), apps_total_size(&apps));
        assert_eq!(decode_apps(bytes.as_slice()).unwrap(), apps);
    }

    #[test]
    fn options_roundtrip() {
        let options = Options {
            bin_dirs: vec!["/bin".into()],
            inc_dirs: vec!["/include".into(), "/include/private".into()],
            lib_dirs: vec!["/lib".into()],
            compiler_flags: vec!["-DNDEBUG".into()],
            linker_flags: vec![],
        };

        let mut bytes = vec![];
        options.encode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), options.size());
        assert_eq!(Options::decode(bytes.as_slice()).unwrap(), options);
    }
}

/*
 * pacwrap
 *
 * Copyright (C) 2023-2024 Xavier Moffett <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Decomposes `{app|runtime}/<id>/<arch>/<branch>` refs (glossary: "Ref").

use std::fmt::{Display, Formatter};

use sandbox_core::{err, impl_error, Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefKind {
    App,
    Runtime,
}

#[derive(Debug, Clone)]
pub struct AppRef {
    pub kind: RefKind,
    pub id: String,
    pub arch: String,
    pub branch: String,
}

#[derive(Debug)]
pub enum RefError {
    Malformed(String),
}

impl_error!(RefError);

impl Display for RefError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(reference) => write!(fmter, "'{reference}': expected '{{app|runtime}}/<id>/<arch>/<branch>'."),
        }
    }
}

impl AppRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let parts: Vec<&str> = reference.split('/').collect();

        if parts.len() != 4 {
            return err!(RefError::Malformed(reference.to_string()));
        }

        let kind = match parts[0] {
            "app" => RefKind::App,
            "runtime" => RefKind::Runtime,
            _ => return err!(RefError::Malformed(reference.to_string())),
        };

        if parts[1].is_empty() || parts[2].is_empty() || parts[3].is_empty() {
            return err!(RefError::Malformed(reference.to_string()));
        }

        Ok(Self { kind, id: parts[1].to_string(), arch: parts[2].to_string(), branch: parts[3].to_string() })
    }

    pub fn as_runtime(&self) -> String {
        format!("runtime/{}/{}/{}", self.id, self.arch, self.branch)
    }
}

impl Display for AppRef {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            RefKind::App => "app",
            RefKind::Runtime => "runtime",
        };

        write!(fmter, "{kind}/{}/{}/{}", self.id, self.arch, self.branch)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_app_ref() {
        let r = AppRef::parse("app/org.example.App/x86_64/stable").unwrap();
        assert_eq!(r.kind, RefKind::App);
        assert_eq!(r.id, "org.example.App");
        assert_eq!(r.as_runtime(), "runtime/org.example.App/x86_64/stable");
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(AppRef::parse("extension/org.example.App/x86_64/stable").is_err());
    }

    #[test]
    fn rejects_short_ref() {
        assert!(AppRef::parse("app/org.example.App").is_err());
    }
}

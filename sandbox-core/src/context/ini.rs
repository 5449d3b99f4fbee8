/*
 * pacwrap-core
 *
 * Copyright (C) 2023-2024 Xavier Moffett <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This library is free software: you can redistribute it and/or modify
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

//! A minimal GKeyFile-flavored INI reader/writer: `[Group Name]` headers,
//! `key=value` lines, `#`/`;` comments, list values joined with `;`. This is
//! the on-disk grammar for metadata files and permission overrides (§6).

use indexmap::IndexMap;

#[derive(Debug, Default, Clone)]
pub struct IniDocument {
    groups: IndexMap<String, IndexMap<String, String>>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = Self::default();
        let mut current = String::new();

        for line in text.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = name.to_string();
                doc.groups.entry(current.clone()).or_default();
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                if current.is_empty() {
                    continue;
                }

                doc.groups.entry(current.clone()).or_default().insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        doc
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &IndexMap<String, String>)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn group(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.groups.get(name)
    }

    pub fn groups_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a IndexMap<String, String>)> {
        self.groups.iter().filter(move |(k, _)| k.starts_with(prefix)).map(|(k, v)| (k.as_str(), v))
    }

    pub fn set(&mut self, group: &str, key: &str, value: impl Into<String>) {
        self.groups.entry(group.to_string()).or_default().insert(key.to_string(), value.into());
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        for (group, entries) in &self.groups {
            if entries.is_empty() {
                continue;
            }

            out.push('[');
            out.push_str(group);
            out.push_str("]\n");

            for (key, value) in entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }

            out.push('\n');
        }

        out
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    value.split(';').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

pub fn join_list<I: IntoIterator<Item = S>, S: AsRef<str>>(items: I) -> String {
    items.into_iter().map(|s| s.as_ref().to_string()).collect::<Vec<_>>().join(";")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_groups_and_lists() {
        let doc = IniDocument::parse(
            "[Context]\nshared=network;ipc\nfilesystems=host;!home\n\n[Session Bus Policy]\norg.example.A=talk\n",
        );
        let ctx = doc.group("Context").unwrap();
        assert_eq!(split_list(&ctx["shared"]), vec!["network", "ipc"]);
        assert_eq!(split_list(&ctx["filesystems"]), vec!["host", "!home"]);
        assert_eq!(doc.group("Session Bus Policy").unwrap()["org.example.A"], "talk");
    }

    #[test]
    fn round_trips_through_render() {
        let mut doc = IniDocument::default();
        doc.set("Context", "shared", "network");
        let rendered = doc.render();
        let reparsed = IniDocument::parse(&rendered);
        assert_eq!(reparsed.group("Context").unwrap()["shared"], "network");
    }
}

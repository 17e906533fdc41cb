// mapache is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::global::ID;

/// The repository manifest. A single copy lives unencrypted-path (but
/// compressed and encrypted, like any other file) at the repository root
/// and is the first thing read when opening a repository: its `version`
/// decides how the rest of the structure is interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub id: ID,
    pub created_time: DateTime<Utc>,
    /// Repository-scoped seed for the content-defined chunker, generated
    /// once at `init` and carried by every repository thereafter so that
    /// two repositories never chunk the same file the same way. See
    /// [`crate::archiver::chunker`] for why the pinned `fastcdc` backend
    /// cannot yet consume it.
    pub chunker_seed: ID,
}

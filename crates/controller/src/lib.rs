/*
 * runq - Workspace-serialized command runs on Kubernetes
 * Copyright (C) 2025 runq team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! runq scheduling core
//!
//! Custom resources for workspaces and runs, plus the reconcilers that keep
//! one ordered queue per workspace and drive each run to completion.

pub mod crds;
pub mod tasks;

// Re-export commonly used types
pub use crds::{Run, RunCommand, RunSpec, RunStatus, Workspace, WorkspaceSpec, WorkspaceStatus};
pub use tasks::config::ControllerConfig;

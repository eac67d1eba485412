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

#![allow(clippy::missing_errors_doc, clippy::doc_markdown)]

//! runq launcher
//!
//! Packages a configuration directory, submits it as a run against a
//! workspace, follows the run through the workspace queue and connects the
//! terminal to its pod once it is at the front. The container's exit code is
//! relayed back to the caller.

pub mod archive;
pub mod config;
pub mod connector;
pub mod error;
pub mod exit;
pub mod launcher;
pub mod monitor;
pub mod naming;
pub mod provision;
pub mod submit;

pub use config::{LauncherConfig, Timeouts};
pub use connector::{KubeConnector, PodConnector};
pub use error::LaunchError;
pub use launcher::Launcher;
pub use provision::NewWorkspace;

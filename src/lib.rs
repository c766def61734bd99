// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Phone side of the watch data plane.
//!
//! [`ppog`] turns a lossy GATT characteristic into a reliable byte stream.
//! [`blobdb`] keeps the watch's key/value databases in sync with local
//! stores, and [`putbytes`] streams apps and firmware to the watch. A
//! [`connection::WatchConnection`] wires all of them up for one watch.

pub mod blobdb;
pub mod config;
pub mod connection;
pub mod packets;
pub mod ppog;
pub mod protocol;
pub mod putbytes;
pub mod storage;

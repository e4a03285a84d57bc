// Copyright 2023 The Arbors Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(unused_must_use)]

pub mod arbor;
pub mod codec;
pub mod execute;
pub mod expr;
pub mod index;
pub mod iter;
pub mod json;
pub mod lock;
pub mod optimize;
pub mod plan;
pub mod schema;
pub mod store;
pub mod tree;

pub use crate::arbor::{Arbor, ArborError, Tree, TreePlan};
pub use crate::store::{delete, list, open, open_with_options, save_multiple};

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

//! Index selection algebra: run-length-encoded sparse sets and their
//! permuted and composite extensions.

mod composite;
mod index_set;
mod layer;
mod spread;

pub use self::composite::{CompositeIndexSet, Segment, VirtualIndex};
pub use self::index_set::{IndexOutOfBounds, IndexSet};
pub use self::layer::{allocate_slot_id, MutationLayer, VirtualKey};
pub use self::spread::{Spread, SpreadIter, Stretch};

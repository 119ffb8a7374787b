// Copyright (c) 2026 The EmberOS Authors.
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

//! Hardware-timer abstraction: clocksources measure time, clockevents
//! deliver interrupts at programmed instants. Both registries keep their
//! devices rating-ordered with a single best device in service.

pub mod clockevent;
pub mod clocksource;

#[cfg(any(test, feature = "std"))]
pub mod sim;

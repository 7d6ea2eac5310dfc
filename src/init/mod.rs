// SPDX-License-Identifier: Apache-2.0

pub mod args;
pub mod harvester;
pub mod output;
pub mod parse;
pub mod registry;
pub mod shipper;
pub mod wait;

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous chat log sink.
//!
//! Producers submit [`entry::Entry`] values through a cloneable
//! [`service::ChatLogHandle`]. A single [`service::ChatLogService`] task drains
//! the bounded queue in order, resolves the destination of every entry and
//! hands the serialized line to a [`sink::Sink`]: either rotating NDJSON files
//! under a root directory, or a durable NATS JetStream queue.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod destination;
pub mod entry;
pub mod errors;
pub mod retry;
pub mod service;
pub mod sink;
pub mod stats;
pub mod timestamp;
pub mod writer;

//! Actor-based collector pipeline
//!
//! Each long-running part of the collector is an independent async task.
//! Control goes through an mpsc command channel wrapped in a typed handle;
//! alerts fan out over a broadcast channel; hot-path bookkeeping uses atomics.
//!
//! ## Architecture Overview
//!
//! ```text
//!   agents ──UDP──▶ IngressActor ──route (fnv(source) % N)──▶ CollectorWorker × N
//!                                                                   │ validated samples
//!                                         pass-through ◀────────────┤
//!                                          (store)                  ▼
//!                                                             Sample Queue (bounded)
//!                                                                   │ drain per tick
//!   ScalerActor ──resize──▶ WorkerPool                              ▼
//!       │  reads queue fill + inbound fill               AggregatorActor ──▶ store
//!       │                                                           │
//!       └──────── CollectorAlert (broadcast) ◀──────────────────────┘
//!                        │
//!                        ▼
//!                   AlertActor ──▶ notification handlers
//! ```
//!
//! ## Actor Types
//!
//! - **IngressActor**: Reads datagrams, decodes them and routes samples
//! - **CollectorWorker**: Validates routed samples and forwards them
//! - **AggregatorActor**: Rolls queued samples into windows and flushes them
//! - **ScalerActor**: Grows and shrinks the worker pool
//! - **AlertActor**: Dispatches collector alerts to notification handlers

pub mod aggregator;
pub mod alert;
pub mod counters;
pub mod ingress;
pub mod messages;
pub mod pool;
pub mod queue;
pub mod router;
pub mod scaler;
pub mod worker;

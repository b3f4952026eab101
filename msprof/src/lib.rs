//! # msprof - NPU Profiling Control
//!
//! msprof launches or attaches to a workload, configures hardware and
//! software collectors on host and device, brings the collected data back into
//! a result directory and hands it to the external analysis tool.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── host: msprof ─────────────────────────────┐
//! │  cli::Args ──▶ MsprofManager ──▶ RunningMode (app|system|parse|...)   │
//! │                                     │                                 │
//! │               ┌─────────────────────┼──────────────────┐              │
//! │               ▼                     ▼                  ▼              │
//! │        task process          HostSamplerTask      DeviceRpcTask       │
//! │   (application, analysis)       (/proc)         (control + data)      │
//! └──────────────────────────────────────────────────────┬────────────────┘
//!                                                        │ sessions
//! ┌──────────────────────────── device: msprofd ─────────▼────────────────┐
//! │  CollectionEntry ──handshake──▶ Receiver ──▶ MsgDispatcher            │
//! │        │                          │              │                    │
//! │        ▼                          ▼              ▼                    │
//! │    Uploader ◀── CollectEngine ◀── ProfJobHandler ◀── TaskManager      │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`device`]: device-side job registry, per-job state machine, session
//!   receivers and message handlers, data uploaders
//! - [`host`]: running modes and their parameter contracts, collection
//!   tasks, child processes, the analysis tool
//! - [`transport`]: the session byte channel (TCP and in-process) and the
//!   message codec
//! - [`cli`]: command line arguments of both binaries
//! - [`domain`]: id newtypes and error enums
//! - [`preflight`]: environment checks before collection starts
//!
//! ## Job Lifecycle (device)
//!
//! 1. A control session arrives; its handshake binds it to a `Receiver`
//! 2. `JobStart` registers a job under `"<job_id>_<dev_id>"` and starts a
//!    fresh collection engine
//! 3. `ReplayStart` / `ReplayStop` re-arm the engine with new PMU events
//! 4. `JobStop` stops the engine and unregisters the job
//! 5. Losing the session stops and unregisters every job bound to it
//!
//! ## Typical Usage
//!
//! ```bash
//! # Profile an application
//! msprof --application="./train.sh" --output=./prof
//!
//! # Sample device 0 system wide for 10 seconds
//! msprofd --listen 127.0.0.1:22118 &
//! msprof --sys-devices=0 --ai-core=on --sys-period=10 --output=./prof
//!
//! # Export a collected job
//! msprof --export=on --output=./prof/PROF_xxx
//! ```

pub mod cli;
pub mod device;
pub mod domain;
pub mod host;
pub mod preflight;
pub mod transport;

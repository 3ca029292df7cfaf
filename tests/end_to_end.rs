// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios from `spec.md` §8, driven through the
//! `skeleton`/`proxy` wrappers the way an application would use them.

use lola::config::{EndpointConfig, TracingEndpointConfig};
use lola::subscription::{EventNotifier, Pid, ReceiveHandler, RegistrationId};
use lola::tracing::{
    BindingTag, MetaInfo, ShmChunk, ShmObjectHandle, SinkResult, TraceClientId, TraceDoneCallback, TraceSink,
    TracingRuntime,
};
use lola::tracing::ServiceElementInstanceId;
use lola::{Proxy, Skeleton, SubscriptionState};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct NullNotifier;
impl EventNotifier for NullNotifier {
    fn register(&self, _key: &str, _handler: ReceiveHandler, _source_pid: Pid) -> RegistrationId {
        1
    }
    fn reregister(&self, _key: &str, _source_pid: Pid) {}
    fn unregister(&self, _key: &str, _registration_id: RegistrationId, _source_pid: Pid) {}
}

fn proxy_for<T: Send + 'static>(control: &Arc<lola::EventDataControl<T>>, name: &str) -> Proxy<T> {
    Proxy::new(
        Arc::clone(control),
        Arc::new(NullNotifier),
        format!("reliable/{name}"),
        1,
        true,
        ServiceElementInstanceId::new("svc", "inst", name),
        None,
        TracingEndpointConfig::disabled(),
    )
}

#[test]
fn scenario_1_publish_receive_one_of_each() {
    let skeleton = Skeleton::<u32>::offer(
        EndpointConfig::new(4, 2),
        ServiceElementInstanceId::new("svc", "inst", "speed"),
        None,
    );
    let proxy = proxy_for(skeleton.control(), "speed");

    proxy.subscribe(4).unwrap();
    let timestamp = skeleton.send_with_allocate(10).unwrap();
    assert_eq!(timestamp, 1);

    let samples = proxy.get_new_samples(4);
    assert_eq!(samples.len(), 1);
    assert_eq!(*samples[0], 10);
    assert_eq!(samples[0].timestamp(), 1);

    drop(samples);
    assert_eq!(proxy.get_num_new_samples_available(), 0);
}

#[test]
fn scenario_2_overflow_of_producer() {
    let skeleton = Skeleton::<u32>::offer(
        EndpointConfig::new(2, 1),
        ServiceElementInstanceId::new("svc", "inst", "speed"),
        None,
    );

    let first = skeleton.allocate().unwrap();
    let _second = skeleton.allocate().unwrap();
    assert!(skeleton.allocate().is_err());

    drop(first);
    assert!(skeleton.allocate().is_ok());
}

#[test]
fn scenario_3_lossy_fast_producer() {
    let skeleton = Skeleton::<u32>::offer(
        EndpointConfig::new(2, 1),
        ServiceElementInstanceId::new("svc", "inst", "speed"),
        None,
    );
    let proxy = proxy_for(skeleton.control(), "speed");
    proxy.subscribe(2).unwrap();

    for value in 1u32..=4 {
        skeleton.send_with_allocate(value).unwrap();
    }

    let samples = proxy.get_new_samples(2);
    let values: Vec<u32> = samples.iter().map(|s| **s).collect();
    assert_eq!(values, vec![3, 4]);

    drop(samples);
    assert_eq!(proxy.get_num_new_samples_available(), 0);
}

#[test]
fn scenario_4_subscribe_unsubscribe_journal() {
    let skeleton = Skeleton::<u32>::offer(
        EndpointConfig::new(4, 2),
        ServiceElementInstanceId::new("svc", "inst", "speed"),
        None,
    );
    let proxy = proxy_for(skeleton.control(), "speed");

    proxy.subscribe(5).unwrap();
    assert_eq!(skeleton.control().subscriber_count(), 1);
    assert_eq!(proxy.state(), SubscriptionState::Subscribed);

    proxy.unsubscribe();
    assert_eq!(skeleton.control().subscriber_count(), 0);
    assert_eq!(proxy.state(), SubscriptionState::NotSubscribed);
}

#[test]
fn scenario_5_crash_recovery() {
    let skeleton = Skeleton::<u32>::offer(
        EndpointConfig::new(1, 1),
        ServiceElementInstanceId::new("svc", "inst", "speed"),
        None,
    );
    let proxy = proxy_for(skeleton.control(), "speed");
    proxy.subscribe(4).unwrap();

    skeleton.send_with_allocate(10).unwrap();
    let samples = proxy.get_new_samples(4);
    assert_eq!(samples.len(), 1);

    // The subscriber "crashes": its reference is never dropped, so the
    // journal is left at the committed-but-undischarged `(1,1)` state.
    std::mem::forget(samples);
    assert!(skeleton.control().allocate_next_slot().is_none());

    skeleton.control().recover().unwrap();

    assert!(skeleton.control().allocate_next_slot().is_some());
}

#[test]
fn scenario_6_trace_disabled_by_consecutive_errors() {
    struct FlakySink {
        failures: AtomicU32,
    }
    impl TraceSink for FlakySink {
        fn register_client(&self, _binding: BindingTag, _app_instance_id: &str) -> TraceClientId {
            TraceClientId(1)
        }
        fn register_shm_object(&self, _client_id: TraceClientId, _fd: i32) -> SinkResult<ShmObjectHandle> {
            Ok(ShmObjectHandle(1))
        }
        fn unregister_shm_object(&self, _client_id: TraceClientId, _handle: ShmObjectHandle) {}
        fn trace_local(&self, _client_id: TraceClientId, _meta: &MetaInfo, _payload: &[u8]) -> SinkResult<()> {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Err(lola::tracing::SinkError::Recoverable)
        }
        fn trace_shm(
            &self,
            _client_id: TraceClientId,
            _meta: &MetaInfo,
            _chunk: ShmChunk,
            _context_id: lola::tracing::TraceContextId,
        ) -> SinkResult<()> {
            Ok(())
        }
        fn register_trace_done_callback(&self, _client_id: TraceClientId, _callback: TraceDoneCallback) {}
    }

    let sink = Arc::new(FlakySink { failures: AtomicU32::new(0) });
    let runtime = TracingRuntime::new(sink.clone(), Some(3));
    runtime.register_client(BindingTag::Lola, "app");
    let element = ServiceElementInstanceId::new("svc", "inst", "speed");

    for _ in 0..3 {
        let _ = runtime.trace_local(
            BindingTag::Lola,
            MetaInfo {
                trace_point: lola::tracing::TracePointKind::Skeleton(lola::tracing::SkeletonTracePoint::Offer),
                element: element.clone(),
                data_id: None,
                data_loss: false,
            },
            &[],
        );
    }

    assert!(!runtime.is_tracing_enabled());
    let result = runtime.trace_local(
        BindingTag::Lola,
        MetaInfo {
            trace_point: lola::tracing::TracePointKind::Skeleton(lola::tracing::SkeletonTracePoint::Offer),
            element,
            data_id: None,
            data_loss: false,
        },
        &[],
    );
    assert_eq!(result, Err(lola::LolaError::TraceDisableAllTracePoints));
    // The fourth call never reached the sink.
    assert_eq!(sink.failures.load(Ordering::Relaxed), 3);
}

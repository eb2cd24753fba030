//! End-to-end pipeline runs on the host kernel.

use rayos_offload::flow::{
    ArtificialInput, EventSink, Produce, Region, RegionNode, ResultConsumer, SinkNode,
};
use rayos_offload::{
    Backend, ComputeStage, ElementwiseKernel, HostKernel, OffloadPipelineBuilder,
};
use std::time::{Duration, Instant};

#[test]
fn test_results_arrive_in_order() {
    let mut input = ArtificialInput::new(10);
    let mut stage = SinkNode::new("stage", ComputeStage::new(HostKernel::add()));
    let results = EventSink::new();

    input.out_port().connect(stage.sink()).unwrap();
    stage.out_port().connect(&results).unwrap();

    input.work();
    input.work();
    stage.tick().unwrap();

    assert_eq!(results.try_recv(), Some(vec![2.0; 10]));
    assert_eq!(results.try_recv(), Some(vec![4.0; 10]));
    assert_eq!(results.try_recv(), None);
}

#[test]
fn test_same_input_same_output() {
    let mut stage = ComputeStage::new(HostKernel::add());
    let input: Vec<f64> = (0..100).map(|i| i as f64 * 0.5).collect();

    let first = stage.compute(&input, &input).unwrap();
    let second = stage.compute(&input, &input).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[99], 99.0);
}

#[test]
fn test_zero_length_array() {
    let mut input = ArtificialInput::new(0);
    let mut stage = SinkNode::new("stage", ComputeStage::new(HostKernel::add()));
    let mut consumer = SinkNode::new("consumer", ResultConsumer::new());

    input.out_port().connect(stage.sink()).unwrap();
    stage.out_port().connect(consumer.sink()).unwrap();

    input.work();
    stage.tick().unwrap();
    consumer.tick().unwrap();

    assert_eq!(consumer.consumer().received(), 1);
    assert_eq!(consumer.consumer().last(), Some(&[][..]));
}

#[test]
fn test_boxed_kernel() {
    let mut kernel: Box<dyn ElementwiseKernel> = Box::new(HostKernel::add());
    assert_eq!(kernel.name(), "add");
    assert_eq!(kernel.launch(&[1.5], &[1.5]).unwrap(), vec![3.0]);
}

#[test]
fn test_stage_in_its_own_region() {
    let mut producer = ArtificialInput::new(4).with_limit(Some(3));
    let mut stage = SinkNode::new("stage", ComputeStage::new(HostKernel::add()));
    let results = EventSink::new();

    producer.out_port().connect(stage.sink()).unwrap();
    stage.out_port().connect(&results).unwrap();

    let mut cpu = Region::new("cpu", Duration::from_millis(1));
    cpu.add_node(producer);
    let mut compute = Region::new("compute", Duration::from_millis(1));
    compute.add_node(stage);

    let cpu = cpu.start().unwrap();
    let compute = compute.start().unwrap();

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while received.len() < 3 && Instant::now() < deadline {
        match results.try_recv() {
            Some(result) => received.push(result),
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }

    cpu.stop().unwrap();
    compute.stop().unwrap();

    assert_eq!(
        received,
        vec![vec![2.0; 4], vec![4.0; 4], vec![6.0; 4]]
    );
}

#[test]
fn test_threaded_pipeline_runs_to_limit() {
    let pipeline = OffloadPipelineBuilder::new()
        .with_backend(Backend::Host)
        .with_array_len(10)
        .with_max_ticks(5)
        .with_tick_interval(Duration::from_millis(1))
        .build_with_kernel(Box::new(HostKernel::add()))
        .unwrap()
        .start()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !pipeline.is_complete() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }

    let report = pipeline.shutdown().unwrap();
    assert_eq!(report.produced, 5);
    assert_eq!(report.consumed, 5);
    assert_eq!(report.stage.invocations, 5);
    assert_eq!(report.stage.failures, 0);
    assert_eq!(report.node_errors, 0);
}

#[tokio::test]
async fn test_host_backend_build() {
    let pipeline = OffloadPipelineBuilder::new()
        .with_backend(Backend::Host)
        .with_max_ticks(2)
        .with_tick_interval(Duration::from_millis(1))
        .build()
        .unwrap()
        .start()
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.wait_complete(Duration::from_millis(1)),
    )
    .await
    .unwrap();

    let report = pipeline.shutdown().unwrap();
    assert_eq!(report.consumed, 2);
}

use anyhow::Result;
use p2p_bench::memory::{DeviceRegion, Region};
use p2p_bench::{
    fabric::StreamFabric, Allocator, BenchError, BenchmarkRunner, BufferError, BufferManager,
    FabricError, OutputFormat, Placement, ReportWriter, SizeSweep, SweepConfig, TransferMode,
};
use std::collections::HashMap;

/// Host-backed stand-in for accelerator memory
struct FakeDevice(Vec<u8>);

impl DeviceRegion for FakeDevice {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn copy_to_host(&self, dst: &mut [u8]) -> Result<(), BufferError> {
        dst.copy_from_slice(&self.0[..dst.len()]);
        Ok(())
    }

    fn copy_from_host(&mut self, src: &[u8]) -> Result<(), BufferError> {
        self.0[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// Allocator recording every allocate and free per placement
#[derive(Default)]
struct CountingAllocator {
    allocations: HashMap<Placement, usize>,
    frees: HashMap<Placement, usize>,
}

impl Allocator for CountingAllocator {
    fn allocate(&mut self, placement: Placement, bytes: usize) -> Result<Region, BufferError> {
        *self.allocations.entry(placement).or_default() += 1;
        Ok(match placement {
            Placement::Host => Region::Host(vec![0; bytes]),
            Placement::Device => Region::Device(Box::new(FakeDevice(vec![0; bytes]))),
        })
    }

    fn free(&mut self, placement: Placement, region: Region) -> Result<(), BufferError> {
        assert_eq!(region.placement(), placement, "buffer freed with the wrong routine");
        *self.frees.entry(placement).or_default() += 1;
        Ok(())
    }
}

fn sweep_up_to(max_size: usize) -> SweepConfig {
    SweepConfig {
        sizes: SizeSweep::default().with_upper_bound(max_size),
        ..SweepConfig::default()
    }
}

#[tokio::test]
async fn two_ranks_complete_every_mode() -> Result<()> {
    for mode in TransferMode::ALL {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let runner = BenchmarkRunner::new(mode, sweep_up_to(256 * 1024));

        let initiator = async {
            let mut fabric = StreamFabric::new(a, 0);
            let mut buffers = BufferManager::new(CountingAllocator::default());
            let mut report = ReportWriter::new(Vec::new(), OutputFormat::Text);
            let samples = runner.run(&mut fabric, &mut buffers, &mut report).await;
            (samples, buffers.into_allocator(), report.into_inner())
        };
        let target = async {
            let mut fabric = StreamFabric::new(b, 1);
            let mut buffers = BufferManager::new(CountingAllocator::default());
            let mut report = ReportWriter::new(Vec::new(), OutputFormat::Text);
            let samples = runner.run(&mut fabric, &mut buffers, &mut report).await;
            (samples, buffers.into_allocator(), report.into_inner())
        };

        let ((sent, sender_alloc, sender_out), (received, receiver_alloc, receiver_out)) =
            tokio::join!(initiator, target);

        let samples = sent?;
        assert_eq!(samples.len(), 19, "{mode}");
        assert!(samples.iter().all(|s| s.time_us > 0.0 && s.bandwidth_gbps > 0.0));
        assert!(received?.is_empty());

        let text = String::from_utf8(sender_out)?;
        assert!(text.starts_with(&format!("# {mode}\n# bytes time_us bw_Gbps\n")));
        assert!(receiver_out.is_empty());

        let (send_placement, recv_placement) = match mode {
            TransferMode::HostToHost => (Placement::Host, Placement::Host),
            TransferMode::HostToDevice => (Placement::Host, Placement::Device),
            TransferMode::DeviceToHost => (Placement::Device, Placement::Host),
            TransferMode::DeviceToDevice => (Placement::Device, Placement::Device),
        };
        assert_eq!(sender_alloc.allocations.get(&send_placement), Some(&1));
        assert_eq!(receiver_alloc.allocations.get(&recv_placement), Some(&1));
        assert_eq!(sender_alloc.allocations, sender_alloc.frees);
        assert_eq!(receiver_alloc.allocations, receiver_alloc.frees);
    }
    Ok(())
}

#[tokio::test]
async fn peer_loss_mid_sweep_aborts_and_releases() -> Result<()> {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let full = BenchmarkRunner::new(TransferMode::DeviceToDevice, sweep_up_to(1024));
    // the target stops after 64 bytes and hangs up
    let short = BenchmarkRunner::new(TransferMode::DeviceToDevice, sweep_up_to(64));

    let initiator = async {
        let mut fabric = StreamFabric::new(a, 0);
        let mut buffers = BufferManager::new(CountingAllocator::default());
        let mut report = ReportWriter::new(Vec::new(), OutputFormat::Text);
        let outcome = full.run(&mut fabric, &mut buffers, &mut report).await;
        (outcome, buffers.into_allocator(), report.into_inner())
    };
    let target = async {
        let mut fabric = StreamFabric::new(b, 1);
        let mut buffers = BufferManager::new(CountingAllocator::default());
        let mut report = ReportWriter::new(Vec::new(), OutputFormat::Text);
        let outcome = short.run(&mut fabric, &mut buffers, &mut report).await;
        drop(fabric);
        outcome
    };

    let ((outcome, allocator, out), target_outcome) = tokio::join!(initiator, target);
    target_outcome?;

    let err = outcome.unwrap_err();
    assert!(
        matches!(err, BenchError::Fabric(FabricError::Io(_))),
        "unexpected error: {err}"
    );

    // the seven completed sizes are reported, the one in flight is not
    let text = String::from_utf8(out)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2 + 7);
    assert!(lines.last().unwrap().starts_with("64 "));

    assert_eq!(allocator.allocations.get(&Placement::Device), Some(&1));
    assert_eq!(allocator.allocations, allocator.frees);
    Ok(())
}

use std::sync::Arc;

use crate::{
    background::Background,
    engine::{Phase, System, SystemContext},
    error::SimResult,
    report::ReportSink,
    rng::SimRng,
};

/// Writes a census line to the report sink every `interval_weeks`.
pub struct ReportingSystem {
    sink: Arc<dyn ReportSink>,
    interval_weeks: u64,
    weeks_seen: u64,
}

impl ReportingSystem {
    pub fn new(sink: Arc<dyn ReportSink>, interval_weeks: u64) -> Self {
        Self {
            sink,
            interval_weeks,
            weeks_seen: 0,
        }
    }
}

impl System for ReportingSystem {
    fn name(&self) -> &str {
        "reporting"
    }

    fn phase(&self) -> Phase {
        Phase::AfterRemovingDead
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        background: &mut Background,
        _rng: &mut SimRng,
    ) -> SimResult<()> {
        self.weeks_seen += 1;
        if self.interval_weeks == 0 || self.weeks_seen % self.interval_weeks != 0 {
            return Ok(());
        }
        let census = background.census();
        self.sink.progress(
            ctx.trial,
            &format!(
                "{}: {} live, {} juvenile, {} incubating, {} infectious, {} immune",
                ctx.now,
                census.live,
                census.juveniles,
                census.incubating,
                census.infectious,
                census.immune
            ),
        );
        Ok(())
    }
}

//! Area estimation
//!
//! The numerator is the adjusted area of in-domain conditions, the
//! denominator all sampled land; the ratio is reported as a percentage.

use crate::algorithm::adjustment::AdjustmentResolver;
use crate::algorithm::aggregation::{DenominatorScope, NumeratorSource};
use crate::assembly::ItemRequest;
use crate::cache::TableCache;
use crate::error::Result;
use crate::estimators::{EstimationOptions, Estimator, Quantity, Reduction};
use crate::output::{Diagnostics, EstimationResult};

impl Estimator<'_> {
    /// Share of sampled land in the land type and area domain
    pub fn area(&self, options: &EstimationOptions, cache: &mut TableCache) -> Result<EstimationResult> {
        let quantity = Quantity::Area;
        let prepared = self.prepare(options, quantity, false)?;
        let data = self.assemble(&prepared, options, None, ItemRequest::None, cache)?;
        let resolver =
            AdjustmentResolver::new(&prepared.resolved.design, self.config.micro_breakpoint_dia);

        self.reduce(
            quantity,
            prepared,
            options,
            &data,
            &resolver,
            &[],
            &Reduction {
                source: NumeratorSource::ParcelArea,
                scope: DenominatorScope::Global,
                scale: 100.0,
            },
            Diagnostics::default(),
        )
    }
}

// Pure computation over measurement master data
pub mod measurement_graph;
pub mod quantity_adjuster;
pub mod requirement_calculator;

// Tenant settings
pub mod company_settings;

// Persistence of order allocations
pub mod allocation_reports;
pub mod allocation_sync;

pub use allocation_reports::{AllocationReportService, ReportFilter, ReportGrouping, ReportLine};
pub use allocation_sync::{AllocationKey, AllocationRequest, AllocationSyncService, OrderPlan};
pub use company_settings::CompanySettings;
pub use measurement_graph::MeasurementGraph;
pub use quantity_adjuster::{AdjustedSplit, Quantity, QuantityAdjuster};
pub use requirement_calculator::RequirementCalculator;

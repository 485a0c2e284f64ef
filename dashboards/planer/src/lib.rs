// Homeboard Planer Dashboard
// Family planner: shared calendars, the weather forecast and a photo frame

pub mod calendar;
pub mod pictures;
pub mod weather;

use homeboard_core::{DashboardPlugin, DataSource, SourceFactory};
use std::sync::Arc;

pub use calendar::{CalendarSettings, CalendarSource};
pub use pictures::{PictureSettings, PictureSource};
pub use weather::{WeatherSettings, WeatherSource};

/// Folder name the planer dashboard is mounted from
pub const PLANER: &str = "planer";

/// The planer dashboard plugin
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanerDashboard;

impl DashboardPlugin for PlanerDashboard {
    fn name(&self) -> &str {
        PLANER
    }

    fn data_sources(&self) -> Vec<SourceFactory> {
        vec![
            SourceFactory::new("calendar", |ctx| {
                Ok(Arc::new(CalendarSource::from_context(ctx)?) as Arc<dyn DataSource>)
            }),
            SourceFactory::new("weather", |ctx| {
                Ok(Arc::new(WeatherSource::from_context(ctx)?) as Arc<dyn DataSource>)
            }),
            SourceFactory::new("pictures", |ctx| {
                Ok(Arc::new(PictureSource::from_context(ctx)?) as Arc<dyn DataSource>)
            }),
        ]
    }
}

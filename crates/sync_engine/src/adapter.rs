//! Single-sensor view of a multi-sensor source

use std::sync::Arc;

use contracts::{
    Frame, FrameIter, MultiScanSource, Result, ScanError, ScanSource, SensorDescriptor, SliceSpec,
};

/// [`ScanSource`] over one sensor slot of a [`MultiScanSource`]
///
/// Ordinals are those of the underlying frame sets, so `get` yields `None`
/// for sets in which the sensor had no frame.
pub struct SingleSensorView {
    source: Arc<dyn MultiScanSource>,
    sensor: usize,
}

impl SingleSensorView {
    pub fn new(source: Arc<dyn MultiScanSource>, sensor: usize) -> Result<Self> {
        if sensor >= source.sensor_count() {
            return Err(ScanError::config_validation(
                "sensor",
                format!("index {sensor} out of {} sensors", source.sensor_count()),
            ));
        }
        Ok(Self { source, sensor })
    }

    pub fn sensor(&self) -> usize {
        self.sensor
    }
}

impl ScanSource for SingleSensorView {
    fn metadata(&self) -> &SensorDescriptor {
        &self.source.metadata()[self.sensor]
    }

    fn is_live(&self) -> bool {
        self.source.is_live()
    }

    fn is_indexed(&self) -> bool {
        self.source.is_indexed()
    }

    fn len(&self) -> Result<usize> {
        self.source.len()
    }

    fn get(&self, index: isize) -> Result<Option<Frame>> {
        Ok(self.source.get(index)?.take(self.sensor))
    }

    fn get_slice(&self, slice: SliceSpec) -> Result<Vec<Option<Frame>>> {
        Ok(self
            .source
            .get_slice(slice)?
            .into_iter()
            .map(|mut set| set.take(self.sensor))
            .collect())
    }

    fn iter(&self) -> Result<FrameIter<'_>> {
        let sensor = self.sensor;
        let frames = self.source.iter()?.filter_map(move |set| match set {
            Ok(mut set) => set.take(sensor).map(Ok),
            Err(e) => Some(Err(e)),
        });
        Ok(Box::new(frames))
    }

    fn close(&self) {
        self.source.close();
    }
}

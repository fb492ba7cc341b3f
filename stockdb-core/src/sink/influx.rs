use stockdb_influx::{InfluxClient, Point};

use crate::Result;
use crate::sink::PointWriter;

impl PointWriter for InfluxClient {
    async fn write(&self, points: &[Point]) -> Result<()> {
        InfluxClient::write(self, points).await?;
        Ok(())
    }
}

/// High Volume Index aligned with the input
///
/// `volume[i] × 100 / max(volume[i - period .. i])`: values above 100 mean the
/// bar traded more than any of the previous `period` bars.
pub fn calculate_hvi_series(volumes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; volumes.len()];
    if period == 0 {
        return series;
    }

    for i in period..volumes.len() {
        let highest = volumes[i - period..i]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);

        if highest > 0.0 {
            series[i] = Some(volumes[i] * 100.0 / highest);
        }
    }

    series
}

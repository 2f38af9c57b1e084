// 🧾 Manifest Builder - tracking numbers → printable PDF + CSV
//
// Layout: tracking numbers are laid out 5 per row in scan order; the last
// row may be shorter. Both formats share the same header fields.
// No I/O happens here; callers upload the returned bytes.

use chrono::NaiveDateTime;
use printpdf::lopdf::{self, Object, StringFormat};
use printpdf::{BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference, Point};
use sha2::{Digest, Sha256};

use crate::error::{IntakeError, Result};

/// Tracking numbers per manifest row
pub const ROW_WIDTH: usize = 5;

const PRINT_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Split tracking numbers into rows of at most `ROW_WIDTH`, preserving order
pub fn chunk_rows(tracking_numbers: &[String]) -> Vec<Vec<String>> {
    tracking_numbers
        .chunks(ROW_WIDTH)
        .map(|chunk| chunk.to_vec())
        .collect()
}

// ============================================================================
// MANIFEST DATA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestData {
    pub courier: String,
    pub bin_number: String,
    pub count: usize,
    pub printed_at: NaiveDateTime,
    pub rows: Vec<Vec<String>>,
}

impl ManifestData {
    pub fn new(
        courier: &str,
        bin_number: &str,
        tracking_numbers: &[String],
        count: usize,
        printed_at: NaiveDateTime,
    ) -> Result<Self> {
        if courier.trim().is_empty() {
            return Err(IntakeError::invalid("Missing courier"));
        }
        if count != tracking_numbers.len() {
            return Err(IntakeError::invalid(format!(
                "Parcel count {} does not match {} tracking numbers",
                count,
                tracking_numbers.len()
            )));
        }

        Ok(ManifestData {
            courier: courier.to_string(),
            bin_number: bin_number.to_string(),
            count,
            printed_at,
            rows: chunk_rows(tracking_numbers),
        })
    }

    pub fn print_date(&self) -> String {
        self.printed_at.format(PRINT_DATE_FORMAT).to_string()
    }

    /// Tracking numbers back in scan order
    pub fn tracking_numbers(&self) -> Vec<String> {
        self.rows.iter().flatten().cloned().collect()
    }
}

/// Rendered manifest, ready for upload
#[derive(Debug, Clone)]
pub struct ManifestDocuments {
    pub pdf: Vec<u8>,
    pub csv: Vec<u8>,
}

impl ManifestDocuments {
    pub fn pdf_digest(&self) -> String {
        sha256_hex(&self.pdf)
    }

    pub fn csv_digest(&self) -> String {
        sha256_hex(&self.csv)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn build_manifest(data: &ManifestData) -> Result<ManifestDocuments> {
    let pdf = render_pdf(data)?;
    let csv = render_csv(data)?;
    Ok(ManifestDocuments { pdf, csv })
}

// ============================================================================
// CSV
// ============================================================================

pub fn render_csv(data: &ManifestData) -> Result<Vec<u8>> {
    let print_date = data.print_date();

    // Empty rows are spacer lines
    let header_rows: Vec<Vec<String>> = vec![
        vec!["".into(), "".into(), "Manifest".into(), "".into(), "".into()],
        Vec::new(),
        vec![
            format!("Courier: {}", data.courier),
            "".into(),
            "".into(),
            format!("Print Date: {}", print_date),
        ],
        vec![
            format!("Bin Number: {}", data.bin_number),
            "".into(),
            "".into(),
            "".into(),
            format!("Parcel Count: {}", data.count),
        ],
        Vec::new(),
        vec!["".into(), "".into(), "Parcel Tracking Numbers".into(), "".into(), "".into()],
        Vec::new(),
    ];

    let mut out = Vec::new();
    for row in header_rows.iter().chain(data.rows.iter()) {
        // The csv crate writes `""` for an empty record; a spacer is a bare line
        if row.is_empty() {
            out.extend_from_slice(b"\r\n");
            continue;
        }

        let mut wtr = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::CRLF)
            .from_writer(&mut out);
        wtr.write_record(row)
            .map_err(|e| IntakeError::Render(format!("CSV write error: {e}")))?;
        wtr.flush()
            .map_err(|e| IntakeError::Render(format!("CSV buffer error: {e}")))?;
    }

    Ok(out)
}

// ============================================================================
// PDF
// ============================================================================

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const TABLE_LEFT: f32 = 14.0;
const TABLE_TOP: f32 = 52.0;
const PAGE_MARGIN: f32 = 14.0;
const COLUMN_WIDTH: f32 = 37.0;
const CELL_PADDING: f32 = 1.0;
const TABLE_FONT_SIZE: f32 = 9.0;
const PT_TO_MM: f32 = 0.352_778;

/// Approximate Helvetica advance width; close enough for centring labels
fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.55 * PT_TO_MM
}

/// printpdf measures from the bottom edge; layout is written from the top
fn from_top(y: f32) -> Mm {
    Mm(PAGE_HEIGHT - y)
}

fn centered(layer: &PdfLayerReference, text: &str, size: f32, y: f32, font: &IndirectFontRef) {
    let x = (PAGE_WIDTH - text_width(text, size)) / 2.0;
    layer.use_text(text, size, Mm(x), from_top(y), font);
}

fn right_aligned(layer: &PdfLayerReference, text: &str, size: f32, right: f32, y: f32, font: &IndirectFontRef) {
    let x = right - text_width(text, size);
    layer.use_text(text, size, Mm(x), from_top(y), font);
}

fn pdf_timestamp(printed_at: NaiveDateTime) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(printed_at.and_utc().timestamp())
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}

pub fn render_pdf(data: &ManifestData) -> Result<Vec<u8>> {
    let stamp = pdf_timestamp(data.printed_at);

    let (doc, page1, layer1) = PdfDocument::new(
        format!("Manifest {}", data.bin_number),
        Mm(PAGE_WIDTH),
        Mm(PAGE_HEIGHT),
        "Layer 1",
    );
    let doc = doc
        .with_creation_date(stamp)
        .with_mod_date(stamp)
        .with_metadata_date(stamp);

    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| IntakeError::Render(format!("PDF font error: {e}")))?;

    let mut layer = doc.get_page(page1).get_layer(layer1);

    // Header block
    centered(&layer, "Manifest", 18.0, 20.0, &font);
    layer.use_text(format!("Courier       : {}", data.courier), 12.0, Mm(10.0), from_top(30.0), &font);
    right_aligned(&layer, &format!("Print Date: {}", data.print_date()), 12.0, 200.0, 30.0, &font);
    layer.use_text(format!("Bin Number: {}", data.bin_number), 12.0, Mm(10.0), from_top(35.0), &font);
    right_aligned(&layer, &format!("Parcel Count: {}", data.count), 12.0, 200.0, 35.0, &font);

    centered(&layer, "Parcel Tracking Number", 14.0, 50.0, &font);
    layer.add_line(Line {
        points: vec![
            (Point::new(Mm(78.0), from_top(51.0)), false),
            (Point::new(Mm(133.0), from_top(51.0)), false),
        ],
        is_closed: false,
    });

    // Tracking number table, 5 fixed-width columns
    let row_height = TABLE_FONT_SIZE * 1.15 * PT_TO_MM + 2.0 * CELL_PADDING;
    let baseline = CELL_PADDING + TABLE_FONT_SIZE * PT_TO_MM;
    let mut y = TABLE_TOP;

    for row in &data.rows {
        if y + row_height > PAGE_HEIGHT - PAGE_MARGIN {
            let (page, page_layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            layer = doc.get_page(page).get_layer(page_layer);
            y = PAGE_MARGIN;
        }

        for (column, tracking_number) in row.iter().enumerate() {
            let x = TABLE_LEFT + column as f32 * COLUMN_WIDTH + CELL_PADDING;
            layer.use_text(tracking_number, TABLE_FONT_SIZE, Mm(x), from_top(y + baseline), &font);
        }
        y += row_height;
    }

    let bytes = doc
        .save_to_bytes()
        .map_err(|e| IntakeError::Render(format!("PDF save error: {e}")))?;

    pin_trailer_id(&bytes, &data.bin_number)
}

/// printpdf fills the trailer `/ID` pair with random strings on every save.
/// Replace both halves with the bin number digest so equal input gives equal bytes.
fn pin_trailer_id(bytes: &[u8], bin_number: &str) -> Result<Vec<u8>> {
    let mut pdf = lopdf::Document::load_mem(bytes)
        .map_err(|e| IntakeError::Render(format!("PDF reload error: {e}")))?;

    let digest = sha256_hex(bin_number.as_bytes());
    let (permanent, changing) = digest.split_at(32);
    pdf.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(permanent.as_bytes().to_vec(), StringFormat::Literal),
            Object::String(changing.as_bytes().to_vec(), StringFormat::Literal),
        ]),
    );

    let mut out = Vec::new();
    pdf.save_to(&mut out)
        .map_err(|e| IntakeError::Render(format!("PDF save error: {e}")))?;
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn printed_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(15, 4, 5)
            .unwrap()
    }

    fn numbers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("59{:08}", i)).collect()
    }

    #[test]
    fn test_chunking_shape() {
        for n in [0usize, 1, 4, 5, 6, 10, 11, 23] {
            let input = numbers(n);
            let rows = chunk_rows(&input);

            assert_eq!(rows.len(), n.div_ceil(ROW_WIDTH), "rows for {}", n);
            if let Some((last, full)) = rows.split_last() {
                assert!(full.iter().all(|r| r.len() == ROW_WIDTH));
                assert!(!last.is_empty() && last.len() <= ROW_WIDTH);
            }
            assert_eq!(rows.concat(), input);
        }
    }

    #[test]
    fn test_dhl_scenario_rows() {
        let tns: Vec<String> = [
            "5911111111", "5922222222", "5933333333", "5944444444", "5955555555", "5966666666",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let data = ManifestData::new("DHL", "DH20261019A", &tns, 6, printed_at()).unwrap();
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[0].len(), 5);
        assert_eq!(data.rows[1], vec!["5966666666".to_string()]);
        assert_eq!(data.tracking_numbers(), tns);
    }

    #[test]
    fn test_count_must_match() {
        let err = ManifestData::new("DHL", "DH20261019A", &numbers(3), 4, printed_at()).unwrap_err();
        assert!(matches!(err, IntakeError::InvalidInput(_)));
    }

    #[test]
    fn test_csv_layout() {
        let data = ManifestData::new("J&T", "JT20261019B", &numbers(6), 6, printed_at()).unwrap();
        let csv = String::from_utf8(render_csv(&data).unwrap()).unwrap();

        let expected = concat!(
            ",,Manifest,,\r\n",
            "\r\n",
            "Courier: J&T,,,Print Date: 19/10/2026 15:04:05\r\n",
            "Bin Number: JT20261019B,,,,Parcel Count: 6\r\n",
            "\r\n",
            ",,Parcel Tracking Numbers,,\r\n",
            "\r\n",
            "5900000000,5900000001,5900000002,5900000003,5900000004\r\n",
            "5900000005\r\n",
        );
        assert_eq!(csv, expected);
    }

    #[test]
    fn test_csv_is_reproducible() {
        let data = ManifestData::new("DHL", "DH20261019A", &numbers(12), 12, printed_at()).unwrap();
        assert_eq!(render_csv(&data).unwrap(), render_csv(&data).unwrap());
    }

    #[test]
    fn test_csv_quotes_awkward_values() {
        let tns = vec!["A,1".to_string()];
        let data = ManifestData::new("DHL", "DH20261019A", &tns, 1, printed_at()).unwrap();
        let csv = String::from_utf8(render_csv(&data).unwrap()).unwrap();
        assert!(csv.ends_with("\"A,1\"\r\n"));
    }

    #[test]
    fn test_pdf_renders_single_and_multi_page() {
        let small = ManifestData::new("DHL", "DH20261019A", &numbers(6), 6, printed_at()).unwrap();
        let pdf = render_pdf(&small).unwrap();
        assert!(pdf.starts_with(b"%PDF"));

        // 300 rows cannot fit one A4 page
        let large = ManifestData::new("DHL", "DH20261019B", &numbers(1500), 1500, printed_at()).unwrap();
        let big_pdf = render_pdf(&large).unwrap();
        assert!(big_pdf.starts_with(b"%PDF"));
        assert!(big_pdf.len() > pdf.len());
    }

    #[test]
    fn test_pdf_is_reproducible() {
        let data = ManifestData::new("DHL", "DH20261019A", &numbers(12), 12, printed_at()).unwrap();
        let first = render_pdf(&data).unwrap();
        let second = render_pdf(&data).unwrap();
        assert_eq!(first, second);

        let pdf = lopdf::Document::load_mem(&first).unwrap();
        let ids: Vec<&[u8]> = pdf
            .trailer
            .get(b"ID")
            .and_then(Object::as_array)
            .unwrap()
            .iter()
            .map(|id| id.as_str().unwrap())
            .collect();
        let digest = sha256_hex(b"DH20261019A");
        assert_eq!(ids, vec![digest[..32].as_bytes(), digest[32..].as_bytes()]);

        // Another bin number gets another id
        let other = ManifestData::new("DHL", "DH20261019B", &numbers(12), 12, printed_at()).unwrap();
        assert_ne!(render_pdf(&other).unwrap(), first);
    }

    #[test]
    fn test_build_manifest_digests() {
        let data = ManifestData::new("DHL", "DH20261019A", &numbers(2), 2, printed_at()).unwrap();
        let docs = build_manifest(&data).unwrap();
        assert_eq!(docs.csv_digest().len(), 64);
        assert_eq!(docs.csv_digest(), sha256_hex(&render_csv(&data).unwrap()));
        assert!(!docs.pdf.is_empty());
    }
}

//! Static signature catalog: magic patterns, size bounds and carve
//! strategies for every recoverable format.
//!
//! The table is immutable and lives for the whole process; recovered
//! files hold `&'static Signature` references. Discriminated container
//! families (RIFF sub-types, ISO-BMFF `ftyp` brands, ZIP payloads) are
//! kept in auxiliary tables consulted by the chunk search.

use crate::types::FileCategory;
use aho_corasick::AhoCorasick;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// How the carver determines the end of a file for this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarveMode {
    /// Search for a terminator pattern (JPEG EOI, PNG IEND, ...).
    Footer,
    /// File size is encoded in a fixed header field (BMP, RIFF, ICO).
    Header,
    /// Walk top-level ISO Base Media boxes (MP4, MOV, HEIC).
    IsoBmff,
    /// Read up to `max_size`, then trim at the next confident boundary.
    MaxRead,
}

/// Immutable catalog entry describing one recoverable format.
#[derive(Debug)]
pub struct Signature {
    pub category: FileCategory,
    pub extension: &'static str,
    pub description: &'static str,
    pub footer: Option<&'static [u8]>,
    pub min_size: u64,
    pub max_size: u64,
    pub carve_mode: CarveMode,
}

impl Signature {
    /// Identity comparison; every signature is a unique static.
    #[inline]
    #[must_use]
    pub fn same(&self, other: &Signature) -> bool {
        std::ptr::eq(self, other)
    }
}

macro_rules! sig {
    ($name:ident, $cat:ident, $ext:literal, $desc:literal, $mode:ident,
     min = $min:expr, max = $max:expr) => {
        pub static $name: Signature = Signature {
            category: FileCategory::$cat,
            extension: $ext,
            description: $desc,
            footer: None,
            min_size: $min,
            max_size: $max,
            carve_mode: CarveMode::$mode,
        };
    };
    ($name:ident, $cat:ident, $ext:literal, $desc:literal, $mode:ident,
     footer = $footer:expr, min = $min:expr, max = $max:expr) => {
        pub static $name: Signature = Signature {
            category: FileCategory::$cat,
            extension: $ext,
            description: $desc,
            footer: Some($footer),
            min_size: $min,
            max_size: $max,
            carve_mode: CarveMode::$mode,
        };
    };
}

// Images
sig!(SIG_JPEG, Image, "jpg", "JPEG Image", Footer, footer = b"\xFF\xD9", min = 4 * KIB, max = 30 * MIB);
sig!(SIG_PNG, Image, "png", "PNG Image", Footer, footer = b"\x00\x00\x00\x00IEND\xAE\x42\x60\x82", min = 4 * KIB, max = 30 * MIB);
sig!(SIG_GIF, Image, "gif", "GIF Image", Footer, footer = b"\x00\x3B", min = KIB, max = 30 * MIB);
sig!(SIG_BMP, Image, "bmp", "BMP Image", Header, min = KIB, max = 100 * MIB);
sig!(SIG_TIFF, Image, "tiff", "TIFF Image", MaxRead, min = 4 * KIB, max = 200 * MIB);
sig!(SIG_JP2, Image, "jp2", "JPEG 2000 Image", MaxRead, min = 4 * KIB, max = 50 * MIB);
sig!(SIG_PSD, Image, "psd", "Adobe Photoshop Document", MaxRead, min = 4 * KIB, max = 2 * GIB);
sig!(SIG_ICO, Image, "ico", "Windows Icon", Header, min = 256, max = MIB);
sig!(SIG_TGA, Image, "tga", "Targa Image", MaxRead, min = KIB, max = 100 * MIB);
sig!(SIG_HEIC, Image, "heic", "HEIC Image", IsoBmff, min = 4 * KIB, max = 80 * MIB);
sig!(SIG_AVIF, Image, "avif", "AVIF Image", IsoBmff, min = 4 * KIB, max = 80 * MIB);
sig!(SIG_SVG, Image, "svg", "SVG Vector Image", MaxRead, min = 64, max = 100 * MIB);
sig!(SIG_WEBP, Image, "webp", "WebP Image", Header, min = KIB, max = 30 * MIB);
sig!(SIG_CR2, Image, "cr2", "Canon RAW (CR2)", MaxRead, min = 8 * KIB, max = 80 * MIB);
sig!(SIG_NEF, Image, "nef", "Nikon RAW (NEF)", MaxRead, min = 8 * KIB, max = 80 * MIB);
sig!(SIG_ARW, Image, "arw", "Sony RAW (ARW)", MaxRead, min = 8 * KIB, max = 80 * MIB);
sig!(SIG_DNG, Image, "dng", "Adobe DNG RAW", MaxRead, min = 8 * KIB, max = 200 * MIB);
sig!(SIG_ORF, Image, "orf", "Olympus RAW (ORF)", MaxRead, min = 8 * KIB, max = 80 * MIB);
sig!(SIG_RW2, Image, "rw2", "Panasonic RAW (RW2)", MaxRead, min = 8 * KIB, max = 80 * MIB);
sig!(SIG_RAF, Image, "raf", "Fujifilm RAW (RAF)", MaxRead, min = 8 * KIB, max = 80 * MIB);

// Videos
sig!(SIG_MP4, Video, "mp4", "MP4 Video", IsoBmff, min = 8 * KIB, max = 8 * GIB);
sig!(SIG_MOV, Video, "mov", "MOV Video (QuickTime)", IsoBmff, min = 8 * KIB, max = 8 * GIB);
sig!(SIG_3GP, Video, "3gp", "3GP Video", IsoBmff, min = 8 * KIB, max = 2 * GIB);
sig!(SIG_M4V, Video, "m4v", "M4V Video (iTunes)", IsoBmff, min = 8 * KIB, max = 8 * GIB);
sig!(SIG_AVI, Video, "avi", "AVI Video", Header, min = 8 * KIB, max = 4 * GIB);
sig!(SIG_MKV, Video, "mkv", "MKV Video (Matroska)", MaxRead, min = 8 * KIB, max = 8 * GIB);
sig!(SIG_WEBM, Video, "webm", "WebM Video", MaxRead, min = 8 * KIB, max = 4 * GIB);
sig!(SIG_FLV, Video, "flv", "Flash Video (FLV)", MaxRead, min = 4 * KIB, max = 2 * GIB);
sig!(SIG_WMV, Video, "wmv", "Windows Media Video", MaxRead, min = 8 * KIB, max = 4 * GIB);
sig!(SIG_MPG, Video, "mpg", "MPEG Program Stream", Footer, footer = b"\x00\x00\x01\xB9", min = 8 * KIB, max = 4 * GIB);
sig!(SIG_TS, Video, "ts", "MPEG Transport Stream", MaxRead, min = 8 * KIB, max = 4 * GIB);
sig!(SIG_VOB, Video, "vob", "DVD Video Object", MaxRead, min = 8 * KIB, max = 2 * GIB);
sig!(SIG_OGV, Video, "ogv", "OGG Video", MaxRead, min = 4 * KIB, max = 2 * GIB);
sig!(SIG_RM, Video, "rm", "RealMedia Video", MaxRead, min = 4 * KIB, max = 2 * GIB);
sig!(SIG_SWF, Video, "swf", "Flash Animation (SWF)", MaxRead, min = 4 * KIB, max = 200 * MIB);

// Audio
sig!(SIG_MP3, Audio, "mp3", "MP3 Audio", MaxRead, min = 4 * KIB, max = 500 * MIB);
sig!(SIG_WAV, Audio, "wav", "WAV Audio", Header, min = 4 * KIB, max = 2 * GIB);
sig!(SIG_FLAC, Audio, "flac", "FLAC Audio (Lossless)", MaxRead, min = 4 * KIB, max = GIB);
sig!(SIG_M4A, Audio, "m4a", "AAC/M4A Audio", IsoBmff, min = 4 * KIB, max = 500 * MIB);
sig!(SIG_OGA, Audio, "ogg", "OGG Audio (Vorbis/Opus)", MaxRead, min = 4 * KIB, max = 500 * MIB);
sig!(SIG_WMA, Audio, "wma", "Windows Media Audio", MaxRead, min = 4 * KIB, max = 500 * MIB);
sig!(SIG_AIFF, Audio, "aiff", "AIFF Audio", Header, min = 4 * KIB, max = 2 * GIB);
sig!(SIG_MIDI, Audio, "mid", "MIDI Sequence", MaxRead, min = 256, max = 10 * MIB);

// Documents
sig!(SIG_PDF, Document, "pdf", "PDF Document", Footer, footer = b"%%EOF", min = KIB, max = 2 * GIB);
sig!(SIG_ZIP, Document, "zip", "ZIP Archive", MaxRead, min = 256, max = 4 * GIB);
sig!(SIG_DOCX, Document, "docx", "Word Document (DOCX)", MaxRead, min = 2 * KIB, max = 500 * MIB);
sig!(SIG_XLSX, Document, "xlsx", "Excel Spreadsheet (XLSX)", MaxRead, min = 2 * KIB, max = 500 * MIB);
sig!(SIG_PPTX, Document, "pptx", "PowerPoint (PPTX)", MaxRead, min = 2 * KIB, max = 500 * MIB);
sig!(SIG_EPUB, Document, "epub", "EPUB E-Book", MaxRead, min = 2 * KIB, max = 500 * MIB);
sig!(SIG_ODT, Document, "odt", "OpenDocument Text", MaxRead, min = 2 * KIB, max = 500 * MIB);
sig!(SIG_ODS, Document, "ods", "OpenDocument Spreadsheet", MaxRead, min = 2 * KIB, max = 500 * MIB);
sig!(SIG_ODP, Document, "odp", "OpenDocument Presentation", MaxRead, min = 2 * KIB, max = 500 * MIB);
sig!(SIG_SQLITE, Document, "sqlite", "SQLite Database", MaxRead, min = 4 * KIB, max = 4 * GIB);
sig!(SIG_RTF, Document, "rtf", "Rich Text Format", Footer, footer = b"}", min = 256, max = 200 * MIB);
sig!(SIG_XML, Document, "xml", "XML Document", MaxRead, min = 64, max = 500 * MIB);
sig!(SIG_HTML, Document, "html", "HTML Document", MaxRead, min = 64, max = 100 * MIB);
sig!(SIG_EPS, Document, "eps", "Encapsulated PostScript", MaxRead, min = 256, max = 200 * MIB);
sig!(SIG_DOC_OLE, Document, "doc", "MS Office Document (OLE)", MaxRead, min = 4 * KIB, max = 500 * MIB);

// Archives
sig!(SIG_7Z, Archive, "7z", "7-Zip Archive", MaxRead, min = 256, max = 4 * GIB);
sig!(SIG_RAR, Archive, "rar", "RAR Archive", MaxRead, min = 256, max = 4 * GIB);
sig!(SIG_GZ, Archive, "gz", "GZIP Compressed", MaxRead, min = 64, max = 4 * GIB);
sig!(SIG_BZ2, Archive, "bz2", "BZIP2 Compressed", MaxRead, min = 64, max = 4 * GIB);
sig!(SIG_XZ, Archive, "xz", "XZ Compressed", MaxRead, min = 64, max = 4 * GIB);
sig!(SIG_TAR, Archive, "tar", "TAR Archive", MaxRead, min = KIB, max = 4 * GIB);
sig!(SIG_CAB, Archive, "cab", "Microsoft Cabinet", Header, min = 256, max = 2 * GIB);
sig!(SIG_ISO, Archive, "iso", "ISO 9660 Disc Image", MaxRead, min = 32 * KIB, max = 8 * GIB);
sig!(SIG_ZSTD, Archive, "zst", "Zstandard Compressed", MaxRead, min = 64, max = 4 * GIB);
sig!(SIG_LZ4, Archive, "lz4", "LZ4 Compressed", MaxRead, min = 64, max = 4 * GIB);

// Executables
sig!(SIG_EXE, Executable, "exe", "Windows Executable (PE)", MaxRead, min = 256, max = 2 * GIB);
sig!(SIG_ELF, Executable, "elf", "ELF Binary", MaxRead, min = 64, max = 2 * GIB);
sig!(SIG_MACHO, Executable, "macho", "Mach-O Binary", MaxRead, min = 64, max = 2 * GIB);
sig!(SIG_DEX, Executable, "dex", "Android DEX Bytecode", MaxRead, min = 256, max = 200 * MIB);
sig!(SIG_CLASS, Executable, "class", "Java Class File", MaxRead, min = 256, max = 50 * MIB);
sig!(SIG_WASM, Executable, "wasm", "WebAssembly Binary", MaxRead, min = 64, max = 200 * MIB);
sig!(SIG_PYC, Executable, "pyc", "Python Compiled Bytecode", MaxRead, min = 64, max = 50 * MIB);

// Fonts
sig!(SIG_TTF, Font, "ttf", "TrueType Font", MaxRead, min = 256, max = 50 * MIB);
sig!(SIG_OTF, Font, "otf", "OpenType Font", MaxRead, min = 256, max = 50 * MIB);
sig!(SIG_WOFF, Font, "woff", "WOFF Web Font", MaxRead, min = 256, max = 50 * MIB);
sig!(SIG_WOFF2, Font, "woff2", "WOFF2 Web Font", MaxRead, min = 256, max = 50 * MIB);

// Data / science
sig!(SIG_PARQUET, Database, "parquet", "Apache Parquet Data", MaxRead, min = 256, max = 4 * GIB);
sig!(SIG_AVRO, Database, "avro", "Apache Avro Data", MaxRead, min = 64, max = 4 * GIB);
sig!(SIG_ORC, Database, "orc", "Apache ORC Data", MaxRead, min = 64, max = 4 * GIB);
sig!(SIG_HDF5, Database, "hdf5", "HDF5 Scientific Data", MaxRead, min = 256, max = 8 * GIB);
sig!(SIG_NPY, Database, "npy", "NumPy Array", MaxRead, min = 128, max = 4 * GIB);
sig!(SIG_PCAP, Database, "pcap", "Network Packet Capture", MaxRead, min = 64, max = 4 * GIB);
sig!(SIG_PCAPNG, Database, "pcapng", "PCAP-NG Network Capture", MaxRead, min = 64, max = 4 * GIB);

// System / misc
sig!(SIG_LNK, System, "lnk", "Windows Shortcut", MaxRead, min = 128, max = MIB);
sig!(SIG_REG, System, "reg", "Windows Registry Hive", MaxRead, min = 4 * KIB, max = 500 * MIB);
sig!(SIG_GPG, System, "gpg", "GPG/PGP Encrypted Data", MaxRead, min = 64, max = 2 * GIB);
sig!(SIG_PLIST, System, "plist", "Apple Binary Property List", MaxRead, min = 64, max = 50 * MIB);
sig!(SIG_DER, System, "der", "DER Certificate / Key", MaxRead, min = 64, max = 10 * MIB);

/// Fixed magic bytes at offset 0 → signature.
///
/// RIFF, `ftyp`, ZIP refinement, MPEG-TS sync, TAR and ISO 9660 are
/// handled by the chunk search via the discriminator tables below.
pub static HEADER_PATTERNS: &[(&[u8], &Signature)] = &[
    // Images
    (b"\xFF\xD8\xFF", &SIG_JPEG),
    (b"\x89PNG\r\n\x1A\n", &SIG_PNG),
    (b"GIF89a", &SIG_GIF),
    (b"GIF87a", &SIG_GIF),
    (b"BM", &SIG_BMP),
    (b"II\x2A\x00", &SIG_TIFF),
    (b"MM\x00\x2A", &SIG_TIFF),
    (b"\x00\x00\x00\x0C\x6A\x50\x20\x20\x0D\x0A\x87\x0A", &SIG_JP2),
    (b"8BPS", &SIG_PSD),
    (b"\x00\x00\x01\x00", &SIG_ICO),
    (b"FUJIFILMCCD-RAW", &SIG_RAF),
    // Videos
    (b"\x1A\x45\xDF\xA3", &SIG_MKV),
    (b"FLV\x01", &SIG_FLV),
    (b"\x30\x26\xB2\x75\x8E\x66\xCF\x11", &SIG_WMV),
    (b"\x00\x00\x01\xBA", &SIG_MPG),
    (b"\x00\x00\x01\xB3", &SIG_MPG),
    (b"\x00\x00\x01\xBB", &SIG_MPG),
    (b"\x00\x00\x01\xB8", &SIG_MPG),
    (b"OggS", &SIG_OGV),
    (b".RMF", &SIG_RM),
    (b"FWS", &SIG_SWF),
    (b"CWS", &SIG_SWF),
    // Audio
    (b"ID3", &SIG_MP3),
    (b"\xFF\xFB", &SIG_MP3),
    (b"\xFF\xFA", &SIG_MP3),
    (b"\xFF\xF3", &SIG_MP3),
    (b"\xFF\xF2", &SIG_MP3),
    (b"fLaC", &SIG_FLAC),
    (b"FORM", &SIG_AIFF),
    (b"MThd", &SIG_MIDI),
    // Documents
    (b"%PDF", &SIG_PDF),
    (b"PK\x03\x04", &SIG_ZIP),
    (b"SQLite format 3\x00", &SIG_SQLITE),
    (b"{\\rtf", &SIG_RTF),
    (b"<?xml", &SIG_XML),
    (b"\xEF\xBB\xBF<?xml", &SIG_XML),
    (b"<!DOCTYPE", &SIG_HTML),
    (b"<html", &SIG_HTML),
    (b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1", &SIG_DOC_OLE),
    (b"%!PS-Adobe", &SIG_EPS),
    // Archives
    (b"7z\xBC\xAF\x27\x1C", &SIG_7Z),
    (b"Rar!\x1A\x07\x01\x00", &SIG_RAR),
    (b"Rar!\x1A\x07\x00", &SIG_RAR),
    (b"\x1F\x8B", &SIG_GZ),
    (b"BZh", &SIG_BZ2),
    (b"\xFD\x37\x7A\x58\x5A\x00", &SIG_XZ),
    (b"MSCF", &SIG_CAB),
    (b"\x28\xB5\x2F\xFD", &SIG_ZSTD),
    (b"\x04\x22\x4D\x18", &SIG_LZ4),
    // Executables
    (b"MZ", &SIG_EXE),
    (b"\x7FELF", &SIG_ELF),
    (b"\xFE\xED\xFA\xCE", &SIG_MACHO),
    (b"\xFE\xED\xFA\xCF", &SIG_MACHO),
    (b"\xCE\xFA\xED\xFE", &SIG_MACHO),
    (b"\xCF\xFA\xED\xFE", &SIG_MACHO),
    (b"\xCA\xFE\xBA\xBE", &SIG_MACHO),
    (b"dex\n", &SIG_DEX),
    (b"\x00asm", &SIG_WASM),
    // Fonts
    (b"\x00\x01\x00\x00", &SIG_TTF),
    (b"true", &SIG_TTF),
    (b"OTTO", &SIG_OTF),
    (b"wOFF", &SIG_WOFF),
    (b"wOF2", &SIG_WOFF2),
    // Data / science
    (b"PAR1", &SIG_PARQUET),
    (b"Obj\x01", &SIG_AVRO),
    (b"ORC", &SIG_ORC),
    (b"\x89HDF\r\n\x1A\n", &SIG_HDF5),
    (b"\x93NUMPY", &SIG_NPY),
    (b"\xD4\xC3\xB2\xA1", &SIG_PCAP),
    (b"\xA1\xB2\xC3\xD4", &SIG_PCAP),
    (b"\x0A\x0D\x0D\x0A", &SIG_PCAPNG),
    // System / misc
    (b"\x4C\x00\x00\x00\x01\x14\x02\x00", &SIG_LNK),
    (b"regf", &SIG_REG),
    (b"bplist", &SIG_PLIST),
];

/// Every signature, including the ones only reachable via a
/// discriminator table; backs the `(extension, category)` lookup.
pub static ALL_SIGNATURES: &[&Signature] = &[
    &SIG_JPEG, &SIG_PNG, &SIG_GIF, &SIG_BMP, &SIG_TIFF, &SIG_JP2, &SIG_PSD, &SIG_ICO, &SIG_TGA,
    &SIG_HEIC, &SIG_AVIF, &SIG_SVG, &SIG_WEBP, &SIG_CR2, &SIG_NEF, &SIG_ARW, &SIG_DNG, &SIG_ORF,
    &SIG_RW2, &SIG_RAF, &SIG_MP4, &SIG_MOV, &SIG_3GP, &SIG_M4V, &SIG_AVI, &SIG_MKV, &SIG_WEBM,
    &SIG_FLV, &SIG_WMV, &SIG_MPG, &SIG_TS, &SIG_VOB, &SIG_OGV, &SIG_RM, &SIG_SWF, &SIG_MP3,
    &SIG_WAV, &SIG_FLAC, &SIG_M4A, &SIG_OGA, &SIG_WMA, &SIG_AIFF, &SIG_MIDI, &SIG_PDF, &SIG_ZIP,
    &SIG_DOCX, &SIG_XLSX, &SIG_PPTX, &SIG_EPUB, &SIG_ODT, &SIG_ODS, &SIG_ODP, &SIG_SQLITE,
    &SIG_RTF, &SIG_XML, &SIG_HTML, &SIG_EPS, &SIG_DOC_OLE, &SIG_7Z, &SIG_RAR, &SIG_GZ, &SIG_BZ2,
    &SIG_XZ, &SIG_TAR, &SIG_CAB, &SIG_ISO, &SIG_ZSTD, &SIG_LZ4, &SIG_EXE, &SIG_ELF, &SIG_MACHO,
    &SIG_DEX, &SIG_CLASS, &SIG_WASM, &SIG_PYC, &SIG_TTF, &SIG_OTF, &SIG_WOFF, &SIG_WOFF2,
    &SIG_PARQUET, &SIG_AVRO, &SIG_ORC, &SIG_HDF5, &SIG_NPY, &SIG_PCAP, &SIG_PCAPNG, &SIG_LNK,
    &SIG_REG, &SIG_GPG, &SIG_PLIST, &SIG_DER,
];

/// RIFF sub-type at offset 8 → signature.
pub static RIFF_SUBTYPES: &[(&[u8; 4], &Signature)] = &[
    (b"WEBP", &SIG_WEBP),
    (b"AVI ", &SIG_AVI),
    (b"WAVE", &SIG_WAV),
];

/// ISO-BMFF major brand (byte 8 of the first `ftyp` box) → signature.
pub fn ftyp_brand(brand: &[u8]) -> Option<&'static Signature> {
    if brand.len() < 4 {
        return None;
    }
    let brand: [u8; 4] = [brand[0], brand[1], brand[2], brand[3]];
    let sig = match &brand {
        b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" | b"msf1" | b"heis" => &SIG_HEIC,
        b"avif" | b"avis" => &SIG_AVIF,
        b"isom" | b"iso2" | b"iso3" | b"iso4" | b"iso5" | b"iso6" | b"mp41" | b"mp42"
        | b"mp71" | b"avc1" | b"MSNV" | b"dash" | b"F4V " | b"mp4 " | b"MP4 " => &SIG_MP4,
        b"qt  " | b"MQT " | b"mov " | b"MOV " => &SIG_MOV,
        b"M4V " | b"M4VH" | b"M4VP" => &SIG_M4V,
        b"3gp4" | b"3gp5" | b"3gp6" | b"3gp7" | b"3gs7" | b"3ge6" | b"3ge7" | b"3gg6"
        | b"3g2a" | b"3g2b" | b"3g2c" => &SIG_3GP,
        b"M4A " | b"M4B " | b"mp4a" => &SIG_M4A,
        _ => {
            // Nero/device brands of the form NDxx, and "mp40".."mp49"
            if brand.starts_with(b"ND") {
                &SIG_MP4
            } else if brand.starts_with(b"mp4") && brand[3].is_ascii_digit() {
                &SIG_MP4
            } else {
                return None;
            }
        }
    };
    Some(sig)
}

/// Short or common patterns that may start a carve but are never
/// trusted as a next-file boundary during MaxRead trimming.
pub static AMBIGUOUS_PATTERNS: &[&[u8]] = &[
    b"BM",
    b"II\x2A\x00",
    b"MM\x00\x2A",
    b"\x00\x00\x01\xBA",
    b"\x00\x00\x01\xB3",
    b"\x00\x00\x01\xBB",
    b"\x00\x00\x01\xB8",
    b"\xFF\xFB",
    b"\xFF\xFA",
    b"\xFF\xF3",
    b"\xFF\xF2",
    b"FWS",
    b"CWS",
    b"\x00\x00\x01\x00",
    b"\x00\x01\x00\x00",
    b"true",
    b"MZ",
    b"\x1F\x8B",
    b"BZh",
    b"ID3",
    b"FORM",
    b"ORC",
    b"<html",
    b"Obj\x01",
    b"\x0A\x0D\x0D\x0A",
];

#[must_use]
pub fn is_ambiguous(pattern: &[u8]) -> bool {
    AMBIGUOUS_PATTERNS.iter().any(|p| *p == pattern)
}

/// One magic hit inside a chunk.
#[derive(Debug, Clone, Copy)]
pub struct PatternHit {
    pub offset: usize,
    pub pattern: &'static [u8],
    pub signature: &'static Signature,
}

/// The immutable catalog plus its compiled multi-pattern matchers.
///
/// Built once at startup; cheap to share behind an `Arc`.
pub struct SignatureCatalog {
    matcher: Option<AhoCorasick>,
    patterns: Vec<(&'static [u8], &'static Signature)>,
    boundary_matcher: Option<AhoCorasick>,
    boundary_patterns: Vec<&'static [u8]>,
}

impl SignatureCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::for_categories(&FileCategory::ALL)
    }

    /// Catalog restricted to the requested categories. An empty slice
    /// enables everything.
    #[must_use]
    pub fn for_categories(categories: &[FileCategory]) -> Self {
        let enabled = |cat: FileCategory| categories.is_empty() || categories.contains(&cat);

        let patterns: Vec<(&'static [u8], &'static Signature)> = HEADER_PATTERNS
            .iter()
            .filter(|(_, sig)| enabled(sig.category))
            .copied()
            .collect();
        let matcher = AhoCorasick::new(patterns.iter().map(|(p, _)| *p)).ok();

        // High-confidence boundary set: every enabled non-ambiguous
        // magic, used to trim MaxRead carves at the next file start.
        let boundary_patterns: Vec<&'static [u8]> = HEADER_PATTERNS
            .iter()
            .filter(|(p, _)| !is_ambiguous(p))
            .map(|(p, _)| *p)
            .collect();
        let boundary_matcher = AhoCorasick::new(boundary_patterns.iter().copied()).ok();

        Self {
            matcher,
            patterns,
            boundary_matcher,
            boundary_patterns,
        }
    }

    /// All magic occurrences in `data`, overlapping included.
    #[must_use]
    pub fn find_matches(&self, data: &[u8]) -> Vec<PatternHit> {
        let Some(matcher) = &self.matcher else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        for mat in matcher.find_overlapping_iter(data) {
            let (pattern, signature) = self.patterns[mat.pattern().as_usize()];
            hits.push(PatternHit {
                offset: mat.start(),
                pattern,
                signature,
            });
        }
        hits
    }

    /// Next high-confidence header boundary at or after `from`,
    /// including RIFF-with-valid-subtype and ftyp-with-valid-brand.
    #[must_use]
    pub fn next_boundary(&self, data: &[u8], from: usize) -> Option<usize> {
        let mut best: Option<usize> = None;

        if let Some(matcher) = &self.boundary_matcher {
            if from < data.len() {
                if let Some(mat) = matcher.find_iter(&data[from..]).next() {
                    best = Some(from + mat.start());
                }
            }
        }

        // RIFF headers only count when the sub-type is recognized.
        let mut pos = from.min(data.len());
        while let Some(rel) = memchr::memmem::find(&data[pos..], b"RIFF") {
            let at = pos + rel;
            if at + 12 <= data.len() && riff_subtype(&data[at..]).is_some() {
                best = Some(best.map_or(at, |b| b.min(at)));
                break;
            }
            pos = at + 4;
        }

        // ftyp boxes only count when the major brand is recognized.
        let mut pos = from.saturating_add(4).min(data.len());
        while let Some(rel) = memchr::memmem::find(&data[pos..], b"ftyp") {
            let at = pos + rel;
            // Box starts 4 bytes before the type tag.
            if at + 8 <= data.len() && ftyp_brand(&data[at + 4..]).is_some() {
                best = Some(best.map_or(at - 4, |b| b.min(at - 4)));
                break;
            }
            pos = at + 4;
        }

        best
    }

    /// Reconstructs a static signature reference from the serializable
    /// `(extension, category)` pair.
    #[must_use]
    pub fn lookup(&self, extension: &str, category: FileCategory) -> Option<&'static Signature> {
        ALL_SIGNATURES
            .iter()
            .copied()
            .find(|sig| sig.extension == extension && sig.category == category)
    }

    #[must_use]
    pub fn boundary_pattern_count(&self) -> usize {
        self.boundary_patterns.len()
    }
}

impl Default for SignatureCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Sub-type discriminator for a buffer starting at a RIFF tag.
#[must_use]
pub fn riff_subtype(data: &[u8]) -> Option<&'static Signature> {
    if data.len() < 12 || &data[..4] != b"RIFF" {
        return None;
    }
    RIFF_SUBTYPES
        .iter()
        .find(|(tag, _)| data[8..12] == tag[..])
        .map(|(_, sig)| *sig)
}

/// After an EBML magic hit, prefer the WebM signature when the doctype
/// literal appears in the first 64 bytes.
#[must_use]
pub fn refine_ebml(data: &[u8]) -> &'static Signature {
    let window = &data[..data.len().min(64)];
    if memchr::memmem::find(window, b"webm").is_some() {
        &SIG_WEBM
    } else {
        &SIG_MKV
    }
}

/// Classifies a ZIP local-file header by its first member name (and,
/// for `mimetype` members, the stored mimetype content).
#[must_use]
pub fn classify_zip(data: &[u8]) -> &'static Signature {
    if data.len() < 30 || &data[..4] != b"PK\x03\x04" {
        return &SIG_ZIP;
    }
    let name_len = u16::from_le_bytes([data[26], data[27]]) as usize;
    let name_end = 30 + name_len;
    if name_len == 0 || name_end > data.len() {
        return &SIG_ZIP;
    }
    let name = &data[30..name_end];

    if name.starts_with(b"word/") {
        return &SIG_DOCX;
    }
    if name.starts_with(b"xl/") {
        return &SIG_XLSX;
    }
    if name.starts_with(b"ppt/") {
        return &SIG_PPTX;
    }
    if name == b"mimetype" {
        // Stored (uncompressed) mimetype content follows the header.
        let body = &data[name_end..data.len().min(name_end + 64)];
        if memchr::memmem::find(body, b"epub+zip").is_some() {
            return &SIG_EPUB;
        }
        if memchr::memmem::find(body, b"opendocument.text").is_some() {
            return &SIG_ODT;
        }
        if memchr::memmem::find(body, b"opendocument.spreadsheet").is_some() {
            return &SIG_ODS;
        }
        if memchr::memmem::find(body, b"opendocument.presentation").is_some() {
            return &SIG_ODP;
        }
        return &SIG_EPUB;
    }
    if name == b"[Content_Types].xml" {
        // Office packages name their payload directory early on.
        let window = &data[..data.len().min(4096)];
        if memchr::memmem::find(window, b"word/").is_some() {
            return &SIG_DOCX;
        }
        if memchr::memmem::find(window, b"xl/").is_some() {
            return &SIG_XLSX;
        }
        if memchr::memmem::find(window, b"ppt/").is_some() {
            return &SIG_PPTX;
        }
    }
    &SIG_ZIP
}

/// MPEG-TS packet size.
pub const TS_PACKET_SIZE: usize = 188;

/// True when `data[pos..]` holds at least three consecutive 188-byte
/// sync packets.
#[must_use]
pub fn is_mpeg_ts(data: &[u8], pos: usize) -> bool {
    (0..3).all(|i| {
        data.get(pos + i * TS_PACKET_SIZE)
            .is_some_and(|&b| b == 0x47)
    })
}

//! Option registries of the packages this crate knows, and typed views of their options.
//!
//! Each registry is built on first use and shared for the rest of the process.
use std::sync::OnceLock;

use crate::codec_error::{OError, OResult};
use crate::options::{OptionRecord, OptionRegistry, OptionSpec, OptionStyle, OptionValue, ValueType};

static BAS6: OnceLock<OptionRegistry> = OnceLock::new();
static WEL: OnceLock<OptionRegistry> = OnceLock::new();
static UZF: OnceLock<OptionRegistry> = OnceLock::new();
static SFR: OnceLock<OptionRegistry> = OnceLock::new();
static AG: OnceLock<OptionRegistry> = OnceLock::new();
static STR: OnceLock<OptionRegistry> = OnceLock::new();

/// Build a registry on first use. The declarations below are static and every one of
/// them is built by the tests, so a duplicate keyword cannot reach this point.
fn shared(cell: &'static OnceLock<OptionRegistry>, declare: fn() -> OResult<OptionRegistry>) -> &'static OptionRegistry {
    cell.get_or_init(|| declare().expect("package registries declare each keyword once"))
}

/// Basic package options (first line of the BAS6 file)
pub fn bas6_registry() -> &'static OptionRegistry {
    shared(&BAS6, declare_bas6)
}

fn declare_bas6() -> OResult<OptionRegistry> {
    OptionRegistry::builder("BAS6")
        .option(OptionSpec::flag("XSECTION"))
        .option(OptionSpec::flag("CHTOCH"))
        .option(OptionSpec::flag("FREE"))
        .option(OptionSpec::flag("PRINTTIME"))
        .option(OptionSpec::flag("SHOWPROGRESS"))
        .option(OptionSpec::new("STOPERROR").value("stoper", ValueType::Float))
        .build()
}

/// Well package options (MODFLOW-NWT)
pub fn wel_registry() -> &'static OptionRegistry {
    shared(&WEL, declare_wel)
}

fn declare_wel() -> OResult<OptionRegistry> {
    OptionRegistry::builder("WEL")
        .option(OptionSpec::new("SPECIFY")
            .value("phiramp", ValueType::Float)
            .optional_value("iunitramp", ValueType::Int))
        .option(OptionSpec::new("TABFILES")
            .value("numtab", ValueType::Int)
            .value("maxval", ValueType::Int))
        .option(OptionSpec::flag("NOPRINT"))
        .option(OptionSpec::new("AUXILIARY").alias("AUX").rest_values("auxname", ValueType::Str).repeatable())
        .build()
}

/// Unsaturated zone flow package options
pub fn uzf_registry() -> &'static OptionRegistry {
    shared(&UZF, declare_uzf)
}

fn declare_uzf() -> OResult<OptionRegistry> {
    OptionRegistry::builder("UZF")
        .option(OptionSpec::flag("SPECIFYTHTR"))
        .option(OptionSpec::flag("SPECIFYTHTI"))
        .option(OptionSpec::flag("NOSURFLEAK"))
        .option(OptionSpec::flag("SPECIFYSURFK"))
        .option(OptionSpec::flag("REJECTSURFK"))
        .option(OptionSpec::flag("SEEPSURFK"))
        .option(OptionSpec::flag("CAPILLARYUZET"))
        .option(OptionSpec::new("ETSQUARE").value("smoothfact", ValueType::Float))
        .option(OptionSpec::new("NETFLUX")
            .value("unitrech", ValueType::Int)
            .value("unitdis", ValueType::Int))
        .option(OptionSpec::flag("SAVEFINF"))
        .build()
}

/// Streamflow routing package options
pub fn sfr_registry() -> &'static OptionRegistry {
    shared(&SFR, declare_sfr)
}

fn declare_sfr() -> OResult<OptionRegistry> {
    OptionRegistry::builder("SFR")
        .option(OptionSpec::flag("REACHINPUT"))
        .option(OptionSpec::flag("TRANSROUTE"))
        .option(OptionSpec::new("TABFILES")
            .value("numtab", ValueType::Int)
            .value("maxval", ValueType::Int))
        .option(OptionSpec::new("LOSSFACTOR").value("factor", ValueType::Float))
        .option(OptionSpec::new("STRHC1KH").value("factorkh", ValueType::Float))
        .option(OptionSpec::new("STRHC1KV").value("factorkv", ValueType::Float))
        .build()
}

/// Agricultural water use package options
pub fn ag_registry() -> &'static OptionRegistry {
    shared(&AG, declare_ag)
}

fn declare_ag() -> OResult<OptionRegistry> {
    OptionRegistry::builder("AG")
        .option(OptionSpec::flag("NOPRINT"))
        .option(OptionSpec::new("IRRIGATION_DIVERSION")
            .value("numirrdiversions", ValueType::Int)
            .value("maxcellsdiversion", ValueType::Int))
        .option(OptionSpec::new("IRRIGATION_WELL")
            .value("numirrwells", ValueType::Int)
            .value("maxcellswell", ValueType::Int))
        .option(OptionSpec::new("SUPPLEMENTAL_WELL")
            .value("numsupwells", ValueType::Int)
            .value("maxdiversions", ValueType::Int))
        .option(OptionSpec::new("MAXWELLS").value("nummaxwell", ValueType::Int))
        .option(OptionSpec::new("TABFILES")
            .value("numtab", ValueType::Int)
            .value("maxval", ValueType::Int))
        .option(OptionSpec::new("PHIRAMP").value("phiramp", ValueType::Float))
        .option(OptionSpec::flag("ETDEMAND"))
        .option(OptionSpec::flag("TRIGGER"))
        .option(OptionSpec::flag("TIMESERIES_DIVERSION"))
        .option(OptionSpec::flag("TIMESERIES_WELL"))
        .option(OptionSpec::flag("TIMESERIES_DIVERSIONET"))
        .option(OptionSpec::flag("TIMESERIES_WELLET"))
        .option(OptionSpec::new("DIVERSIONLIST").value("unit_diversionlist", ValueType::Int))
        .option(OptionSpec::new("WELLLIST").value("unit_welllist", ValueType::Int))
        .option(OptionSpec::new("WELLIRRLIST").value("unit_irrlist", ValueType::Int))
        .option(OptionSpec::new("DIVERSIONIRRLIST").value("unit_irrdiversion", ValueType::Int))
        .option(OptionSpec::new("WELLCBC").value("unitcbc", ValueType::Int))
        .build()
}

/// Stream package options (the end of its first data line)
pub fn str_registry() -> &'static OptionRegistry {
    shared(&STR, declare_str)
}

fn declare_str() -> OResult<OptionRegistry> {
    OptionRegistry::builder("STR")
        .option(OptionSpec::new("AUXILIARY").alias("AUX").rest_values("auxname", ValueType::Str).repeatable())
        .build()
}

/// The registry of a package type by its name file type, e.g. `"UZF"`
pub fn registry_for(package: &str) -> Option<&'static OptionRegistry> {
    match package.to_ascii_uppercase().as_str() {
        "BAS6" | "BAS" => Some(bas6_registry()),
        "WEL" => Some(wel_registry()),
        "UZF" | "UZF1" => Some(uzf_registry()),
        "SFR" | "SFR2" => Some(sfr_registry()),
        "AG" => Some(ag_registry()),
        "STR" => Some(str_registry()),
        _ => None,
    }
}

fn value_at<'a>(rec: &'a OptionRecord, keyword: &str, i: usize, name: &'static str) -> OResult<&'a OptionValue> {
    rec.get(keyword)
        .and_then(|v| v.get(i))
        .ok_or_else(|| OError::MissingValue { keyword: keyword.to_string(), value: name })
}

fn int_at(rec: &OptionRecord, keyword: &str, i: usize, name: &'static str) -> OResult<i64> {
    let v = value_at(rec, keyword, i, name)?;
    v.as_int().ok_or_else(|| OError::InvalidValue { keyword: keyword.to_string(), value: name, text: v.to_string() })
}

fn float_at(rec: &OptionRecord, keyword: &str, i: usize, name: &'static str) -> OResult<f64> {
    let v = value_at(rec, keyword, i, name)?;
    v.as_float().ok_or_else(|| OError::InvalidValue { keyword: keyword.to_string(), value: name, text: v.to_string() })
}

fn opt_float(rec: &OptionRecord, keyword: &str, name: &'static str) -> OResult<Option<f64>> {
    if rec.contains(keyword) {
        float_at(rec, keyword, 0, name).map(Some)
    } else {
        Ok(None)
    }
}

fn opt_pair(rec: &OptionRecord, keyword: &str, names: (&'static str, &'static str)) -> OResult<Option<(i64, i64)>> {
    if rec.contains(keyword) {
        Ok(Some((int_at(rec, keyword, 0, names.0)?, int_at(rec, keyword, 1, names.1)?)))
    } else {
        Ok(None)
    }
}

fn set_if(rec: &mut OptionRecord, keyword: &str, on: bool) {
    if on {
        rec.set_flag(keyword);
    }
}

/// `SPECIFY` values of the well package
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Specify {
    pub phiramp: f64,
    pub iunitramp: Option<i64>,
}

/// Typed view of the well package options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WelOptions {
    pub specify: Option<Specify>,
    pub tabfiles: Option<(i64, i64)>,
    pub noprint: bool,
    pub auxiliary: Vec<String>,
}

impl WelOptions {
    pub fn from_record(rec: &OptionRecord) -> OResult<Self> {
        let specify = if rec.contains("SPECIFY") {
            let iunitramp = match rec.get("SPECIFY").and_then(|v| v.get(1)) {
                Some(_) => Some(int_at(rec, "SPECIFY", 1, "iunitramp")?),
                None => None,
            };
            Some(Specify { phiramp: float_at(rec, "SPECIFY", 0, "phiramp")?, iunitramp })
        } else {
            None
        };

        Ok(Self {
            specify,
            tabfiles: opt_pair(rec, "TABFILES", ("numtab", "maxval"))?,
            noprint: rec.contains("NOPRINT"),
            auxiliary: aux_names(rec),
        })
    }

    pub fn to_record(&self, style: OptionStyle) -> OptionRecord {
        let mut rec = OptionRecord::new(style);
        if let Some(s) = self.specify {
            let mut values = vec![OptionValue::Float(s.phiramp)];
            values.extend(s.iunitramp.map(OptionValue::Int));
            rec.set("SPECIFY", values);
        }
        if let Some((numtab, maxval)) = self.tabfiles {
            rec.set("TABFILES", vec![OptionValue::Int(numtab), OptionValue::Int(maxval)]);
        }
        set_if(&mut rec, "NOPRINT", self.noprint);
        set_aux_names(&mut rec, &self.auxiliary);
        rec
    }
}

/// Typed view of the unsaturated zone flow package options
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UzfOptions {
    pub specifythtr: bool,
    pub specifythti: bool,
    pub nosurfleak: bool,
    pub specifysurfk: bool,
    pub rejectsurfk: bool,
    pub seepsurfk: bool,
    pub capillaryuzet: bool,
    /// `ETSQUARE` smoothing factor
    pub smoothfact: Option<f64>,
    /// `NETFLUX` output units
    pub netflux: Option<(i64, i64)>,
    pub savefinf: bool,
}

impl UzfOptions {
    pub fn from_record(rec: &OptionRecord) -> OResult<Self> {
        Ok(Self {
            specifythtr: rec.contains("SPECIFYTHTR"),
            specifythti: rec.contains("SPECIFYTHTI"),
            nosurfleak: rec.contains("NOSURFLEAK"),
            specifysurfk: rec.contains("SPECIFYSURFK"),
            rejectsurfk: rec.contains("REJECTSURFK"),
            seepsurfk: rec.contains("SEEPSURFK"),
            capillaryuzet: rec.contains("CAPILLARYUZET"),
            smoothfact: opt_float(rec, "ETSQUARE", "smoothfact")?,
            netflux: opt_pair(rec, "NETFLUX", ("unitrech", "unitdis"))?,
            savefinf: rec.contains("SAVEFINF"),
        })
    }

    pub fn to_record(&self, style: OptionStyle) -> OptionRecord {
        let mut rec = OptionRecord::new(style);
        set_if(&mut rec, "SPECIFYTHTR", self.specifythtr);
        set_if(&mut rec, "SPECIFYTHTI", self.specifythti);
        set_if(&mut rec, "NOSURFLEAK", self.nosurfleak);
        set_if(&mut rec, "SPECIFYSURFK", self.specifysurfk);
        set_if(&mut rec, "REJECTSURFK", self.rejectsurfk);
        set_if(&mut rec, "SEEPSURFK", self.seepsurfk);
        set_if(&mut rec, "CAPILLARYUZET", self.capillaryuzet);
        if let Some(f) = self.smoothfact {
            rec.set("ETSQUARE", vec![OptionValue::Float(f)]);
        }
        if let Some((rech, dis)) = self.netflux {
            rec.set("NETFLUX", vec![OptionValue::Int(rech), OptionValue::Int(dis)]);
        }
        set_if(&mut rec, "SAVEFINF", self.savefinf);
        rec
    }
}

/// Typed view of the streamflow routing package options
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SfrOptions {
    pub reachinput: bool,
    pub transroute: bool,
    pub tabfiles: Option<(i64, i64)>,
    pub lossfactor: Option<f64>,
    /// `STRHC1KH` factor
    pub factorkh: Option<f64>,
    /// `STRHC1KV` factor
    pub factorkv: Option<f64>,
}

impl SfrOptions {
    pub fn from_record(rec: &OptionRecord) -> OResult<Self> {
        Ok(Self {
            reachinput: rec.contains("REACHINPUT"),
            transroute: rec.contains("TRANSROUTE"),
            tabfiles: opt_pair(rec, "TABFILES", ("numtab", "maxval"))?,
            lossfactor: opt_float(rec, "LOSSFACTOR", "factor")?,
            factorkh: opt_float(rec, "STRHC1KH", "factorkh")?,
            factorkv: opt_float(rec, "STRHC1KV", "factorkv")?,
        })
    }

    pub fn to_record(&self, style: OptionStyle) -> OptionRecord {
        let mut rec = OptionRecord::new(style);
        set_if(&mut rec, "REACHINPUT", self.reachinput);
        set_if(&mut rec, "TRANSROUTE", self.transroute);
        if let Some((numtab, maxval)) = self.tabfiles {
            rec.set("TABFILES", vec![OptionValue::Int(numtab), OptionValue::Int(maxval)]);
        }
        for (kw, v) in [("LOSSFACTOR", self.lossfactor), ("STRHC1KH", self.factorkh), ("STRHC1KV", self.factorkv)] {
            if let Some(v) = v {
                rec.set(kw, vec![OptionValue::Float(v)]);
            }
        }
        rec
    }
}

/// Typed view of the stream package options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StrOptions {
    pub auxiliary: Vec<String>,
}

impl StrOptions {
    pub fn from_record(rec: &OptionRecord) -> OResult<Self> {
        Ok(Self { auxiliary: aux_names(rec) })
    }

    pub fn to_record(&self, style: OptionStyle) -> OptionRecord {
        let mut rec = OptionRecord::new(style);
        set_aux_names(&mut rec, &self.auxiliary);
        rec
    }
}

fn aux_names(rec: &OptionRecord) -> Vec<String> {
    rec.get("AUXILIARY").unwrap_or_default()
        .iter()
        .map(|v| v.to_string())
        .collect()
}

fn set_aux_names(rec: &mut OptionRecord, names: &[String]) {
    if !names.is_empty() {
        rec.set("AUXILIARY", names.iter().map(|a| OptionValue::Str(a.clone())).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option_parser::OptionBlockParser;
    use crate::option_writer::OptionBlockWriter;

    #[test]
    fn test_registries_build() -> OResult<()> {
        let declared: [fn() -> OResult<OptionRegistry>; 6] = [declare_bas6, declare_wel, declare_uzf, declare_sfr, declare_ag, declare_str];
        for (declare, n) in declared.into_iter().zip([6, 4, 10, 6, 18, 1]) {
            let reg = declare()?;
            assert_eq!(reg.len(), n, "{}", reg.package());
        }
        for name in ["BAS6", "wel", "UZF1", "SFR", "AG", "str"] {
            assert!(registry_for(name).is_some(), "{name}");
        }
        assert!(registry_for("LPF").is_none());
        assert!(std::ptr::eq(wel_registry(), registry_for("WEL").unwrap()), "registries are built once");
        Ok(())
    }

    #[test]
    fn test_str_options() -> OResult<()> {
        let parser = OptionBlockParser::new(str_registry());
        let parsed = parser.parse_line("AUX IFACE AUX XYZ")?;
        let opts = StrOptions::from_record(&parsed.record)?;
        assert_eq!(opts.auxiliary, vec!["IFACE", "XYZ"]);
        assert!(parsed.warnings.is_empty());

        let rec = opts.to_record(OptionStyle::SingleLine);
        assert_eq!(rec, parsed.record);
        assert_eq!(OptionBlockWriter::new(str_registry()).render(&rec)?, "AUXILIARY IFACE AUXILIARY XYZ");
        assert!(StrOptions::default().to_record(OptionStyle::SingleLine).is_empty());
        Ok(())
    }

    #[test]
    fn test_wel_options() -> OResult<()> {
        let parsed = OptionBlockParser::new(wel_registry()).parse_str("OPTIONS\nSPECIFY 0.5 10\nTABFILES 2 28\nEND\n")?;
        let opts = WelOptions::from_record(&parsed.record)?;
        assert_eq!(opts.specify, Some(Specify { phiramp: 0.5, iunitramp: Some(10) }));
        assert_eq!(opts.tabfiles, Some((2, 28)));
        assert!(!opts.noprint);
        assert_eq!(opts.to_record(OptionStyle::Block), parsed.record);

        let parsed = OptionBlockParser::new(wel_registry()).parse_line("10 50 AUX IFACE NOPRINT")?;
        let opts = WelOptions::from_record(&parsed.record)?;
        assert_eq!(opts.auxiliary, vec!["IFACE"]);
        assert!(opts.noprint);
        assert_eq!(opts.specify, None);
        Ok(())
    }

    #[test]
    fn test_uzf_options_round_trip() -> OResult<()> {
        let text = "OPTIONS\nSPECIFYTHTR\nSPECIFYTHTI\nNOSURFLEAK\nSPECIFYSURFK\nSEEPSURFK\nETSQUARE 0.7\nNETFLUX 10 20\nSAVEFINF\nEND\n";
        let parsed = OptionBlockParser::new(uzf_registry()).parse_str(text)?;
        let mut opts = UzfOptions::from_record(&parsed.record)?;
        assert_eq!(opts.smoothfact, Some(0.7));
        assert_eq!(opts.netflux, Some((10, 20)));
        assert!(!opts.rejectsurfk);

        let writer = OptionBlockWriter::new(uzf_registry());
        assert_eq!(writer.render(&opts.to_record(OptionStyle::Block))?, text);

        opts.smoothfact = Some(0.4);
        let line = writer.render(&opts.to_record(OptionStyle::SingleLine))?;
        let back = OptionBlockParser::new(uzf_registry()).parse_line(&line)?;
        assert_eq!(UzfOptions::from_record(&back.record)?.smoothfact, Some(0.4));
        Ok(())
    }

    #[test]
    fn test_sfr_options() -> OResult<()> {
        let parsed = OptionBlockParser::new(sfr_registry())
            .parse_str("OPTIONS\nREACHINPUT\nTRANSROUTE\nTABFILES 10 21\nLOSSFACTOR 0.5\nSTRHC1KH 0.2\nSTRHC1KV 0.4\nEND\n")?;
        let mut opts = SfrOptions::from_record(&parsed.record)?;
        assert_eq!((opts.factorkh, opts.factorkv), (Some(0.2), Some(0.4)));

        opts.factorkh = None;
        opts.factorkv = None;
        let rec = opts.to_record(OptionStyle::Block);
        assert!(!rec.contains("STRHC1KH"));
        assert_eq!(SfrOptions::from_record(&rec)?, opts);
        Ok(())
    }

    #[test]
    fn test_typed_view_errors() {
        let mut rec = OptionRecord::new(OptionStyle::Block);
        rec.set("NETFLUX", vec![OptionValue::Int(10)]);
        assert!(matches!(UzfOptions::from_record(&rec), Err(OError::MissingValue { value: "unitdis", .. })));

        rec.set("NETFLUX", vec![OptionValue::Int(10), OptionValue::Str("x".into())]);
        assert!(matches!(UzfOptions::from_record(&rec), Err(OError::InvalidValue { value: "unitdis", .. })));
    }
}

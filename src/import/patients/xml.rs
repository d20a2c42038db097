//! Streaming reader for the patient XML export.
//!
//! Pulls start/end events off a buffered reader and yields one record per
//! closed `Paciente` element. Event buffers are reused and no element tree
//! is retained, so memory use is independent of document size.

use crate::error::ImportError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// One `Paciente` element with its child fields as trimmed strings.
/// Children absent from the element are left empty.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub codigo: String,
    pub cpf: String,
    pub full_name: String,
    pub gender: String,
    pub city_code: String,
    pub neighborhood: String,
    pub insurance: String,
    pub cid_code: String,
}

/// The child elements of `Paciente` we extract.
#[derive(Debug, Clone, Copy)]
enum Field {
    Codigo,
    Cpf,
    FullName,
    Gender,
    CityCode,
    Neighborhood,
    Insurance,
    CidCode,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"Codigo" => Some(Self::Codigo),
            b"CPF" => Some(Self::Cpf),
            b"Nome_Completo" => Some(Self::FullName),
            b"Genero" => Some(Self::Gender),
            b"Cod_municipio" => Some(Self::CityCode),
            b"Bairro" => Some(Self::Neighborhood),
            b"Convenio" => Some(Self::Insurance),
            b"CID-10" => Some(Self::CidCode),
            _ => None,
        }
    }

    fn assign(self, record: &mut PatientRecord, value: &str) {
        let slot = match self {
            Self::Codigo => &mut record.codigo,
            Self::Cpf => &mut record.cpf,
            Self::FullName => &mut record.full_name,
            Self::Gender => &mut record.gender,
            Self::CityCode => &mut record.city_code,
            Self::Neighborhood => &mut record.neighborhood,
            Self::Insurance => &mut record.insurance,
            Self::CidCode => &mut record.cid_code,
        };
        *slot = value.to_string();
    }
}

/// Pull-based source over the patient document.
pub struct PatientSource {
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
}

impl PatientSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImportError> {
        let file = File::open(path.as_ref())?;
        let reader = Reader::from_reader(BufReader::with_capacity(READ_BUFFER_SIZE, file));
        Ok(Self {
            reader,
            buf: Vec::with_capacity(8192),
        })
    }

    /// Parse forward to the next complete `Paciente` element.
    ///
    /// Returns `Ok(None)` at end of document. Malformed XML, including a
    /// document that ends inside an open record, is a fatal error.
    pub fn next_record(&mut self) -> Result<Option<PatientRecord>, ImportError> {
        let mut record: Option<PatientRecord> = None;
        let mut field: Option<Field> = None;
        let mut text = String::new();

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(ref e) => {
                    if e.name().as_ref() == b"Paciente" {
                        record = Some(PatientRecord::default());
                    } else if record.is_some() {
                        field = Field::from_tag(e.name().as_ref());
                        text.clear();
                    }
                }
                Event::Text(ref e) => {
                    if field.is_some() {
                        text.push_str(&e.unescape()?);
                    }
                }
                Event::CData(ref e) => {
                    if field.is_some() {
                        text.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::End(ref e) => {
                    if e.name().as_ref() == b"Paciente" {
                        if let Some(complete) = record.take() {
                            return Ok(Some(complete));
                        }
                    } else if let Some(f) = field.take() {
                        if let Some(ref mut rec) = record {
                            f.assign(rec, text.trim());
                        }
                    }
                }
                Event::Eof => {
                    if record.is_some() {
                        return Err(ImportError::Xml(
                            "unexpected end of file inside a Paciente element".to_string(),
                        ));
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Pacientes>
  <Paciente>
    <Codigo> P001 </Codigo>
    <CPF>12345678901</CPF>
    <Nome_Completo>Maria da Silva</Nome_Completo>
    <Genero>F</Genero>
    <Cod_municipio>3550308</Cod_municipio>
    <Bairro>Centro</Bairro>
    <Convenio>SIM</Convenio>
    <CID-10>A00</CID-10>
  </Paciente>
  <Paciente>
    <Codigo>P002</Codigo>
    <CPF>98765432100</CPF>
    <Nome_Completo>Joao Souza</Nome_Completo>
    <Genero>M</Genero>
    <Bairro></Bairro>
    <Convenio>nao</Convenio>
  </Paciente>
</Pacientes>
"#;

    fn source_for(xml: &str) -> (PatientSource, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(xml.as_bytes()).unwrap();
        file.flush().unwrap();
        let source = PatientSource::open(file.path()).unwrap();
        (source, file)
    }

    #[test]
    fn extracts_and_trims_fields() {
        let (mut source, _file) = source_for(SAMPLE_XML);

        let first = source.next_record().unwrap().unwrap();
        assert_eq!(first.codigo, "P001");
        assert_eq!(first.cpf, "12345678901");
        assert_eq!(first.full_name, "Maria da Silva");
        assert_eq!(first.gender, "F");
        assert_eq!(first.city_code, "3550308");
        assert_eq!(first.neighborhood, "Centro");
        assert_eq!(first.insurance, "SIM");
        assert_eq!(first.cid_code, "A00");
    }

    #[test]
    fn missing_children_default_to_empty() {
        let (mut source, _file) = source_for(SAMPLE_XML);
        source.next_record().unwrap().unwrap();

        let second = source.next_record().unwrap().unwrap();
        assert_eq!(second.codigo, "P002");
        assert_eq!(second.city_code, "");
        assert_eq!(second.neighborhood, "");
        assert_eq!(second.insurance, "nao");
        assert_eq!(second.cid_code, "");

        assert!(source.next_record().unwrap().is_none());
    }

    #[test]
    fn document_without_records_yields_none() {
        let (mut source, _file) = source_for("<Pacientes></Pacientes>");
        assert!(source.next_record().unwrap().is_none());
    }

    #[test]
    fn truncated_document_is_an_error() {
        let (mut source, _file) =
            source_for("<Pacientes><Paciente><Codigo>P001</Codigo>");
        let err = source.next_record().unwrap_err();
        assert!(matches!(err, ImportError::Xml(_)));
    }
}
